//! Host startup: wires configuration, the supervisor, the bridge, the cache
//! front and the window together.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use deskshell_bridge_protocol::{AppInfo, MessageDialogOptions, MessageKind};
use deskshell_core::{
    current_platform, load_host_settings, BackendSettings, Bridge, CacheSettings, CommandDialogs,
    DialogHost, HostContext, HostError, HostSettings, LaunchLayout, LifecycleAction, Preferences,
    ProcessControl, Readiness, Result, StorageConfig, Supervisor, SupervisorConfig, WindowLauncher,
};
use offline_cache::{CacheConfig, CacheEngine, HttpNetwork, InstallBackoff, StoreRegistry};
use tracing::{error, info, warn};
use url::Url;

use crate::proxy;
use crate::RunArgs;

pub fn run(storage: StorageConfig, args: RunArgs) -> Result<()> {
    storage.ensure_dirs()?;

    let settings = match load_host_settings(&storage.settings_file()) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(error = %err, "Failed to load host settings; using defaults");
            HostSettings::default()
        }
    };
    let preferences = Preferences::load(&storage.preferences_file());
    let server_port = preferences.server_port();
    let proxy_port = preferences.proxy_port();

    let layout = resolve_layout(&args)?;
    let cli_overrides = BackendSettings {
        python: args.python.clone(),
        script: args.script.clone(),
        ..Default::default()
    };
    let config = SupervisorConfig::for_layout(&layout, server_port)
        .with_settings(&settings.backend)
        .with_settings(&cli_overrides);
    let backend_url = config.backend_url();

    let dialogs: Arc<dyn DialogHost> = Arc::new(CommandDialogs);
    let app_info = AppInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        platform: current_platform(),
        is_development_mode: config.development_mode,
    };
    let bridge = Bridge::new(app_info, Arc::clone(&dialogs));
    let supervisor = Arc::new(Mutex::new(Supervisor::new(config)));
    let host = Arc::new(HostContext::new(supervisor, bridge, Arc::new(ProcessControl)));

    start_bridge(&storage, &host);
    start_backend(&host, dialogs.as_ref());

    let window_url = match start_cache(&storage, &settings.cache, &backend_url, proxy_port) {
        Some(addr) => format!("http://{}/", addr),
        None => format!("{}/", backend_url),
    };

    if args.no_window {
        info!(url = %window_url, "Window disabled; waiting for quit over the bridge");
        park_forever();
    }

    let launcher = WindowLauncher::new(settings.window.launcher.clone(), storage.bridge_socket());
    match launcher.open(&window_url) {
        Ok(Some(mut child)) => {
            match child.wait() {
                Ok(status) => info!(code = ?status.code(), "Window closed"),
                Err(err) => warn!(error = %err, "Lost track of the window process"),
            }
            host.perform(LifecycleAction::Quit);
            Ok(())
        }
        Ok(None) => park_forever(),
        Err(err) => {
            host.stop_backend();
            Err(err)
        }
    }
}

fn park_forever() -> ! {
    loop {
        thread::park();
    }
}

fn resolve_layout(args: &RunArgs) -> Result<LaunchLayout> {
    if args.dev {
        let cwd = std::env::current_dir()
            .map_err(|err| HostError::io("resolve current directory", err))?;
        return Ok(LaunchLayout::development(cwd));
    }
    if let Some(dir) = &args.resources_dir {
        return Ok(LaunchLayout::packaged(dir.clone()));
    }

    let exe = std::env::current_exe().map_err(|err| HostError::io("resolve executable", err))?;
    let exe_dir = exe.parent().unwrap_or_else(|| Path::new("."));
    // macOS bundles keep resources in Contents/Resources beside Contents/MacOS.
    let resources = if cfg!(target_os = "macos") {
        exe_dir.join("..").join("Resources")
    } else {
        exe_dir.join("resources")
    };
    Ok(LaunchLayout::packaged(resources))
}

#[cfg(unix)]
fn start_bridge(storage: &StorageConfig, host: &Arc<HostContext>) {
    use crate::bridge_server;

    let result = bridge_server::bind(&storage.bridge_socket())
        .and_then(|listener| bridge_server::spawn(listener, Arc::clone(host)));
    if let Err(err) = result {
        error!(error = %err, path = %storage.bridge_socket().display(), "Failed to start bridge");
    }
}

#[cfg(not(unix))]
fn start_bridge(_storage: &StorageConfig, _host: &Arc<HostContext>) {
    warn!("Bridge transport requires Unix domain sockets; bridge disabled");
}

/// Starts the backend. Failures are shown to the user but never stop the
/// host: the window still opens and reports the connection failure itself.
fn start_backend(host: &HostContext, dialogs: &dyn DialogHost) {
    let result = host
        .supervisor()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .start();

    match result {
        Ok(Readiness::Ready) => {}
        Ok(Readiness::TimedOut) => warn!("Opening window without a readiness confirmation"),
        Ok(Readiness::Exited(code)) => {
            let detail = match code {
                Some(code) => format!("The backend exited with code {} before it was ready.", code),
                None => "The backend exited before it was ready.".to_string(),
            };
            show_backend_error(dialogs, detail);
        }
        Err(err) => show_backend_error(dialogs, err.to_string()),
    }
}

fn show_backend_error(dialogs: &dyn DialogHost, detail: String) {
    let mut options = MessageDialogOptions::new(
        MessageKind::Error,
        "Backend Error",
        "The backend server could not be started.",
    );
    options.detail = Some(detail);
    if let Err(err) = dialogs.message(&options) {
        warn!(error = %err, "Failed to show backend error dialog");
    }
}

/// Starts the intercepting front and brings the cache up in the background,
/// retrying until the backend serves the manifest.
/// Returns `None` when the window should load the backend directly.
fn start_cache(
    storage: &StorageConfig,
    settings: &CacheSettings,
    backend_url: &str,
    proxy_port: u16,
) -> Option<SocketAddr> {
    let origin = match Url::parse(backend_url) {
        Ok(origin) => origin,
        Err(err) => {
            warn!(error = %err, url = backend_url, "Invalid backend URL; offline cache disabled");
            return None;
        }
    };

    let mut config = CacheConfig::new(origin);
    if let Some(prefix) = &settings.store_prefix {
        config.store_prefix = prefix.clone();
    }
    if let Some(generation) = &settings.generation {
        config.generation = generation.clone();
    }
    if let Some(manifest) = &settings.manifest {
        config.manifest = manifest.clone();
    }

    let network = match HttpNetwork::new() {
        Ok(network) => network,
        Err(err) => {
            warn!(error = %err, "Offline cache disabled");
            return None;
        }
    };
    let engine = Arc::new(CacheEngine::new(
        config,
        StoreRegistry::new(storage.caches_dir()),
        Arc::new(network),
    ));

    let addr = match proxy::spawn(Arc::clone(&engine), proxy_port) {
        Ok(addr) => addr,
        Err(err) => {
            warn!(error = %err, port = proxy_port, "Cache proxy unavailable; loading backend directly");
            return None;
        }
    };

    let spawned = thread::Builder::new()
        .name("cache-install".to_string())
        .spawn(move || {
            let attempts = engine.bring_up(InstallBackoff::default());
            info!(attempts, "Offline cache ready");
        });
    if let Err(err) = spawned {
        warn!(error = %err, "Failed to start offline cache install");
    }

    Some(addr)
}
