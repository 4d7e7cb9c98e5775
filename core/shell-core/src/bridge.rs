//! Privileged bridge dispatch.
//!
//! The UI runs unprivileged and reaches the host only through the fixed set
//! of channels in [`Channel`]. Payloads are validated here, before any dialog
//! is shown or any lifecycle action is taken. Unknown channels never get this
//! far: they fail to deserialize at the transport.

use std::sync::Arc;

use deskshell_bridge_protocol::{
    parse_message_dialog_options, parse_open_dialog_options, parse_save_dialog_options,
    require_empty_payload, AppInfo, Channel, ErrorInfo, Request, Response, ERROR_DIALOG_FAILED,
    ERROR_PROTOCOL_MISMATCH, PROTOCOL_VERSION,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dialogs::DialogHost;
use crate::error::Result;

/// Platform name reported to the UI.
pub fn current_platform() -> String {
    match std::env::consts::OS {
        "macos" => "darwin".to_string(),
        "windows" => "win32".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Restart,
    Quit,
}

#[derive(Debug)]
pub enum BridgeOutcome {
    Reply(Response),
    /// Fire-and-forget: acknowledge first, then perform `action`.
    Deferred {
        ack: Response,
        action: LifecycleAction,
    },
}

impl BridgeOutcome {
    pub fn response(&self) -> &Response {
        match self {
            BridgeOutcome::Reply(response) => response,
            BridgeOutcome::Deferred { ack, .. } => ack,
        }
    }
}

pub struct Bridge {
    app_info: AppInfo,
    dialogs: Arc<dyn DialogHost>,
}

impl Bridge {
    pub fn new(app_info: AppInfo, dialogs: Arc<dyn DialogHost>) -> Self {
        Self { app_info, dialogs }
    }

    pub fn app_info(&self) -> &AppInfo {
        &self.app_info
    }

    pub fn dispatch(&self, request: Request) -> BridgeOutcome {
        if request.protocol_version != PROTOCOL_VERSION {
            return BridgeOutcome::Reply(Response::error(
                request.id,
                ERROR_PROTOCOL_MISMATCH,
                "unsupported protocol version",
            ));
        }

        let Request {
            channel,
            id,
            payload,
            ..
        } = request;
        debug!(channel = channel.name(), id = ?id, "Bridge request");

        match channel {
            Channel::GetAppInfo => {
                if let Err(err) = require_empty_payload(channel, payload.as_ref()) {
                    return reject(channel, id, err);
                }
                BridgeOutcome::Reply(to_response(id, &self.app_info))
            }
            Channel::OpenFileDialog => match parse_open_dialog_options(payload) {
                Ok(options) => BridgeOutcome::Reply(dialog_response(
                    channel,
                    id,
                    self.dialogs.open_file(&options),
                )),
                Err(err) => reject(channel, id, err),
            },
            Channel::SaveFileDialog => match parse_save_dialog_options(payload) {
                Ok(options) => BridgeOutcome::Reply(dialog_response(
                    channel,
                    id,
                    self.dialogs.save_file(&options),
                )),
                Err(err) => reject(channel, id, err),
            },
            Channel::MessageDialog => match parse_message_dialog_options(payload) {
                Ok(options) => BridgeOutcome::Reply(dialog_response(
                    channel,
                    id,
                    self.dialogs.message(&options),
                )),
                Err(err) => reject(channel, id, err),
            },
            Channel::RestartApplication => deferred(channel, id, payload, LifecycleAction::Restart),
            Channel::QuitApplication => deferred(channel, id, payload, LifecycleAction::Quit),
        }
    }
}

fn deferred(
    channel: Channel,
    id: Option<String>,
    payload: Option<Value>,
    action: LifecycleAction,
) -> BridgeOutcome {
    if let Err(err) = require_empty_payload(channel, payload.as_ref()) {
        return reject(channel, id, err);
    }
    BridgeOutcome::Deferred {
        ack: Response::accepted(id),
        action,
    }
}

fn reject(channel: Channel, id: Option<String>, err: ErrorInfo) -> BridgeOutcome {
    warn!(channel = channel.name(), code = %err.code, message = %err.message, "Rejected bridge request");
    BridgeOutcome::Reply(Response::error_with_info(id, err))
}

fn dialog_response<T: Serialize>(channel: Channel, id: Option<String>, result: Result<T>) -> Response {
    match result {
        Ok(value) => to_response(id, &value),
        Err(err) => {
            warn!(channel = channel.name(), error = %err, "Dialog failed");
            Response::error(id, ERROR_DIALOG_FAILED, err.to_string())
        }
    }
}

fn to_response<T: Serialize>(id: Option<String>, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize response: {}", err),
        ),
    }
}
