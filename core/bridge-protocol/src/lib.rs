//! Wire schema and boundary validation for the deskshell privileged bridge.
//!
//! This crate is shared by the host and its UI clients to prevent schema drift.
//! The host remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.
//!
//! The channel set is closed: a request naming anything outside [`Channel`]
//! fails to deserialize and is answered with `invalid_request`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

/// Environment variable through which the UI process learns the socket path.
pub const BRIDGE_SOCKET_ENV: &str = "DESKSHELL_BRIDGE_SOCKET";

pub const ERROR_INVALID_REQUEST: &str = "invalid_request";
pub const ERROR_PROTOCOL_MISMATCH: &str = "protocol_mismatch";
pub const ERROR_DIALOG_FAILED: &str = "dialog_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "app:getInfo")]
    GetAppInfo,
    #[serde(rename = "dialog:openFile")]
    OpenFileDialog,
    #[serde(rename = "dialog:saveFile")]
    SaveFileDialog,
    #[serde(rename = "dialog:message")]
    MessageDialog,
    #[serde(rename = "app:restart")]
    RestartApplication,
    #[serde(rename = "app:quit")]
    QuitApplication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    RequestResponse,
    FireAndForget,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::GetAppInfo,
        Channel::OpenFileDialog,
        Channel::SaveFileDialog,
        Channel::MessageDialog,
        Channel::RestartApplication,
        Channel::QuitApplication,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Channel::GetAppInfo => "app:getInfo",
            Channel::OpenFileDialog => "dialog:openFile",
            Channel::SaveFileDialog => "dialog:saveFile",
            Channel::MessageDialog => "dialog:message",
            Channel::RestartApplication => "app:restart",
            Channel::QuitApplication => "app:quit",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Channel::RestartApplication | Channel::QuitApplication => Direction::FireAndForget,
            _ => Direction::RequestResponse,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub channel: Channel,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl Request {
    pub fn new(channel: Channel, payload: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            channel,
            id: None,
            payload,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ERROR_INVALID_REQUEST, message)
    }

    pub fn is_invalid_request(&self) -> bool {
        self.code == ERROR_INVALID_REQUEST
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn accepted(id: Option<String>) -> Self {
        Self::ok(id, serde_json::json!({ "accepted": true }))
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel payloads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub version: String,
    pub platform: String,
    pub is_development_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileFilter {
    pub name: String,
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OpenDialogProperty {
    OpenFile,
    OpenDirectory,
    MultiSelections,
    ShowHiddenFiles,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OpenDialogOptions {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub default_path: Option<String>,
    #[serde(default)]
    pub button_label: Option<String>,
    #[serde(default)]
    pub filters: Vec<FileFilter>,
    #[serde(default)]
    pub properties: Vec<OpenDialogProperty>,
}

impl OpenDialogOptions {
    pub fn has_property(&self, property: OpenDialogProperty) -> bool {
        self.properties.contains(&property)
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        validate_filters(&self.filters)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SaveDialogOptions {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub default_path: Option<String>,
    #[serde(default)]
    pub button_label: Option<String>,
    #[serde(default)]
    pub filters: Vec<FileFilter>,
}

impl SaveDialogOptions {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        validate_filters(&self.filters)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    None,
    Info,
    Error,
    Question,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageDialogOptions {
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub buttons: Vec<String>,
    #[serde(default)]
    pub default_id: Option<usize>,
    #[serde(default)]
    pub cancel_id: Option<usize>,
}

impl MessageDialogOptions {
    pub fn new(kind: MessageKind, title: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            title: Some(title.to_string()),
            detail: None,
            buttons: Vec::new(),
            default_id: None,
            cancel_id: None,
        }
    }

    /// Buttons shown to the user. An empty list means a single "OK" button.
    pub fn effective_buttons(&self) -> Vec<String> {
        if self.buttons.is_empty() {
            vec!["OK".to_string()]
        } else {
            self.buttons.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.message.trim().is_empty() {
            return Err(ErrorInfo::invalid_request("message is required"));
        }
        if self.buttons.iter().any(|label| label.trim().is_empty()) {
            return Err(ErrorInfo::invalid_request("button labels must not be empty"));
        }

        let count = self.effective_buttons().len();
        for (field, value) in [("defaultId", self.default_id), ("cancelId", self.cancel_id)] {
            if let Some(index) = value {
                if index >= count {
                    return Err(ErrorInfo::invalid_request(format!(
                        "{} {} is out of range for {} button(s)",
                        field, index, count
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDialogResult {
    pub canceled: bool,
    pub file_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDialogResult {
    pub canceled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDialogResult {
    pub response: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Boundary parsing
// ─────────────────────────────────────────────────────────────────────────────

pub fn parse_open_dialog_options(payload: Option<Value>) -> Result<OpenDialogOptions, ErrorInfo> {
    let options: OpenDialogOptions = parse_optional_payload(payload, "open dialog options")?;
    options.validate()?;
    Ok(options)
}

pub fn parse_save_dialog_options(payload: Option<Value>) -> Result<SaveDialogOptions, ErrorInfo> {
    let options: SaveDialogOptions = parse_optional_payload(payload, "save dialog options")?;
    options.validate()?;
    Ok(options)
}

pub fn parse_message_dialog_options(
    payload: Option<Value>,
) -> Result<MessageDialogOptions, ErrorInfo> {
    let payload = match payload {
        Some(Value::Null) | None => {
            return Err(ErrorInfo::invalid_request("message dialog options are required"))
        }
        Some(value) => value,
    };
    let options: MessageDialogOptions = parse_object(payload, "message dialog options")?;
    options.validate()?;
    Ok(options)
}

/// Channels without a payload accept nothing but an absent, null or empty-object payload.
pub fn require_empty_payload(channel: Channel, payload: Option<&Value>) -> Result<(), ErrorInfo> {
    match payload {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Object(map)) if map.is_empty() => Ok(()),
        Some(_) => Err(ErrorInfo::invalid_request(format!(
            "{} does not take a payload",
            channel.name()
        ))),
    }
}

fn parse_optional_payload<T>(payload: Option<Value>, what: &str) -> Result<T, ErrorInfo>
where
    T: DeserializeOwned + Default,
{
    match payload {
        Some(Value::Null) | None => Ok(T::default()),
        Some(value) => parse_object(value, what),
    }
}

fn parse_object<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, ErrorInfo> {
    if !value.is_object() {
        return Err(ErrorInfo::invalid_request(format!(
            "{} must be an object",
            what
        )));
    }
    serde_json::from_value(value)
        .map_err(|err| ErrorInfo::invalid_request(format!("{} are invalid: {}", what, err)))
}

fn validate_filters(filters: &[FileFilter]) -> Result<(), ErrorInfo> {
    for filter in filters {
        if filter.name.trim().is_empty() {
            return Err(ErrorInfo::invalid_request("filter name is required"));
        }
        if filter.extensions.is_empty() {
            return Err(ErrorInfo::invalid_request(format!(
                "filter {} has no extensions",
                filter.name
            )));
        }
        if filter
            .extensions
            .iter()
            .any(|ext| ext.trim().is_empty() || ext.contains('/') || ext.contains('\\'))
        {
            return Err(ErrorInfo::invalid_request(format!(
                "filter {} has an invalid extension",
                filter.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_names_round_trip_through_serde() {
        for channel in Channel::ALL {
            let encoded = serde_json::to_value(channel).unwrap();
            assert_eq!(encoded, json!(channel.name()));
        }
    }

    #[test]
    fn only_restart_and_quit_are_fire_and_forget() {
        let fire: Vec<_> = Channel::ALL
            .into_iter()
            .filter(|c| c.direction() == Direction::FireAndForget)
            .collect();
        assert_eq!(
            fire,
            vec![Channel::RestartApplication, Channel::QuitApplication]
        );
    }

    #[test]
    fn rejects_unknown_channel() {
        let raw = json!({
            "protocol_version": PROTOCOL_VERSION,
            "channel": "fs:readFile",
            "payload": { "path": "/etc/passwd" }
        });
        assert!(serde_json::from_value::<Request>(raw).is_err());
    }

    #[test]
    fn rejects_unknown_envelope_fields() {
        let raw = json!({
            "protocol_version": PROTOCOL_VERSION,
            "channel": "app:getInfo",
            "eval": "process.exit()"
        });
        assert!(serde_json::from_value::<Request>(raw).is_err());
    }

    #[test]
    fn open_dialog_defaults_when_payload_missing() {
        let options = parse_open_dialog_options(None).unwrap();
        assert_eq!(options, OpenDialogOptions::default());
    }

    #[test]
    fn open_dialog_parses_electron_style_options() {
        let options = parse_open_dialog_options(Some(json!({
            "title": "Import",
            "defaultPath": "/tmp",
            "filters": [{ "name": "Videos", "extensions": ["mp4", "mkv"] }],
            "properties": ["openFile", "multiSelections"]
        })))
        .unwrap();
        assert_eq!(options.title.as_deref(), Some("Import"));
        assert!(options.has_property(OpenDialogProperty::MultiSelections));
        assert!(!options.has_property(OpenDialogProperty::OpenDirectory));
    }

    #[test]
    fn open_dialog_rejects_unknown_fields() {
        let err = parse_open_dialog_options(Some(json!({ "securityScopedBookmarks": true })))
            .unwrap_err();
        assert!(err.is_invalid_request());
    }

    #[test]
    fn open_dialog_rejects_non_object_payload() {
        let err = parse_open_dialog_options(Some(json!("C:/"))).unwrap_err();
        assert!(err.is_invalid_request());
    }

    #[test]
    fn open_dialog_rejects_empty_filter_extensions() {
        let err = parse_open_dialog_options(Some(json!({
            "filters": [{ "name": "Nothing", "extensions": [] }]
        })))
        .unwrap_err();
        assert!(err.is_invalid_request());
    }

    #[test]
    fn save_dialog_rejects_properties_field() {
        let err =
            parse_save_dialog_options(Some(json!({ "properties": ["openFile"] }))).unwrap_err();
        assert!(err.is_invalid_request());
    }

    #[test]
    fn message_dialog_requires_message() {
        assert!(parse_message_dialog_options(None).is_err());
        assert!(parse_message_dialog_options(Some(json!({ "message": "  " }))).is_err());
    }

    #[test]
    fn message_dialog_checks_button_indices() {
        let err = parse_message_dialog_options(Some(json!({
            "message": "Delete export?",
            "buttons": ["Delete", "Cancel"],
            "cancelId": 2
        })))
        .unwrap_err();
        assert!(err.message.contains("cancelId"));

        let ok = parse_message_dialog_options(Some(json!({
            "message": "Delete export?",
            "type": "warning",
            "buttons": ["Delete", "Cancel"],
            "defaultId": 1,
            "cancelId": 1
        })))
        .unwrap();
        assert_eq!(ok.kind, MessageKind::Warning);
    }

    #[test]
    fn empty_payload_channels_reject_data() {
        assert!(require_empty_payload(Channel::GetAppInfo, None).is_ok());
        assert!(require_empty_payload(Channel::QuitApplication, Some(&json!({}))).is_ok());
        assert!(require_empty_payload(Channel::RestartApplication, Some(&json!([1]))).is_err());
    }

    #[test]
    fn app_info_serializes_camel_case() {
        let info = AppInfo {
            version: "1.0.0".to_string(),
            platform: "linux".to_string(),
            is_development_mode: true,
        };
        let value = serde_json::to_value(info).unwrap();
        assert_eq!(value["isDevelopmentMode"], json!(true));
    }
}
