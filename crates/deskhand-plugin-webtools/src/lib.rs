//! The web toolkit plugin.
//!
//! Owns a locally spawned web server exposing browser-based tool pages
//! (JSON formatter, markdown editor, diff viewer). The server is run
//! as a [`SupervisedTask`]: started on demand, probed to readiness,
//! and shut down within bounded timeouts. "Open tool page" requests
//! made before the server is up are deferred and fire exactly once on
//! reaching `Running`.
//!
//! Requires a tokio runtime: the supervised task's control loop is
//! spawned during `initialize()`.

use std::sync::Arc;

use tracing::{info, warn};

use deskhand_plugin::{
    HostContext, Plugin, PluginError, PluginMetadata, PluginSpec, PluginView, ViewLink,
};
use deskhand_supervisor::{ChildSpec, HttpProbe, SupervisedTask, TaskState, TaskTimings};
use deskhand_types::config::current_choice;
use serde_json::{json, Map};

/// Plugin name; matches the plugin's directory.
pub const PLUGIN_NAME: &str = "webtools";

const PORT_KEY: &str = "port";
const HOST_KEY: &str = "server_host";
const TOKEN_KEY: &str = "password_api_token";
const COMMAND_KEY: &str = "server_command";
const SHORTCUT_KEY: &str = "shortcut_open_toolkit";

const DEFAULT_PORT: u64 = 8501;
const DEFAULT_COMMAND: &str = "webtools-server";

/// Environment variable the server reads its API token from. The value
/// goes into the child environment only; it is never logged.
pub const TOKEN_ENV: &str = "WEBTOOLS_API_TOKEN";

/// Tool pages the server exposes, as label/path pairs.
pub const TOOL_PAGES: &[(&str, &str)] = &[
    ("JSON Formatter", "/json-formatter"),
    ("Markdown Editor", "/markdown-editor"),
    ("Diff Viewer", "/diff-viewer"),
    ("Timestamp Converter", "/timestamp"),
];

/// Registry entry for this plugin.
pub fn plugin_spec() -> PluginSpec {
    PluginSpec {
        metadata,
        build: |context| Box::new(WebtoolsPlugin::new(context)),
    }
}

fn metadata() -> PluginMetadata {
    let mut defaults = Map::new();
    defaults.insert(PORT_KEY.into(), json!(DEFAULT_PORT));
    defaults.insert(HOST_KEY.into(), json!(["0.0.0.0", "localhost"]));
    defaults.insert(TOKEN_KEY.into(), json!(""));
    defaults.insert(COMMAND_KEY.into(), json!(DEFAULT_COMMAND));
    defaults.insert(SHORTCUT_KEY.into(), json!("Ctrl+Alt+W"));
    PluginMetadata {
        name: PLUGIN_NAME.into(),
        display_name: "Web Toolkit".into(),
        description: "Browser-based utility pages served by a local web server".into(),
        version: "1.4.0".into(),
        author: "deskhand".into(),
        default_settings: defaults,
    }
}

/// The address the liveness probe polls. A wildcard bind address is
/// probed via loopback.
pub fn probe_address(host: &str, port: u64) -> String {
    let host = if host == "0.0.0.0" { "127.0.0.1" } else { host };
    format!("http://{host}:{port}/")
}

/// Build the server child spec from the configured command line.
pub fn server_spec(command: &str, host: &str, port: u64) -> Result<ChildSpec, PluginError> {
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(PluginError::Runtime("server command is empty".into()));
    };
    Ok(ChildSpec::new(program)
        .args(parts)
        .args(["--host", host])
        .args(["--port", &port.to_string()]))
}

/// The web toolkit plugin instance.
pub struct WebtoolsPlugin {
    context: HostContext,
    task: Option<SupervisedTask>,
    address: String,
}

impl WebtoolsPlugin {
    fn new(context: HostContext) -> Self {
        Self {
            context,
            task: None,
            address: String::new(),
        }
    }

    /// The address the server will answer on once running.
    pub fn server_address(&self) -> &str {
        &self.address
    }

    /// The supervised server task, once initialized.
    pub fn task(&self) -> Option<&SupervisedTask> {
        self.task.as_ref()
    }

    fn task_or_err(&self) -> Result<&SupervisedTask, PluginError> {
        self.task
            .as_ref()
            .ok_or_else(|| PluginError::Runtime("webtools is not initialized".into()))
    }

    /// Begin starting the server in the background. Safe to call while
    /// it is already starting or running.
    pub fn start_server(&self) -> Result<(), PluginError> {
        let task = self.task_or_err()?.clone();
        tokio::spawn(async move {
            if let Err(err) = task.start().await {
                warn!(%err, "server start rejected");
            }
        });
        Ok(())
    }

    /// Request that the named tool page opens in the browser once the
    /// server is running, starting the server if necessary. Issued
    /// while stopped, the open fires exactly once after readiness.
    pub fn open_tool(&self, path: &str) -> Result<(), PluginError> {
        let task = self.task_or_err()?;
        let path = path.to_owned();
        task.open_when_running(move |address| {
            let url = format!("{}{}", address.trim_end_matches('/'), path);
            info!(%url, "opening tool page");
            if let Err(err) = open::that(&url) {
                warn!(%err, %url, "failed to open tool page");
            }
        })
        .map_err(|err| PluginError::Runtime(err.to_string()))?;
        self.start_server()
    }

    /// Stop the server in the background; bounded by the task's grace
    /// and force windows.
    pub fn stop_server(&self) -> Result<(), PluginError> {
        let task = self.task_or_err()?.clone();
        tokio::spawn(async move {
            if let Err(err) = task.stop().await {
                warn!(%err, "server stop failed");
            }
        });
        Ok(())
    }

    /// Current server task state, `Stopped` before initialization.
    pub fn server_state(&self) -> TaskState {
        self.task
            .as_ref()
            .map(SupervisedTask::state)
            .unwrap_or(TaskState::Stopped)
    }
}

impl Plugin for WebtoolsPlugin {
    fn metadata(&self) -> PluginMetadata {
        metadata()
    }

    fn initialize(&mut self) -> Result<bool, PluginError> {
        let settings = self.context.settings();
        let port = settings
            .get_setting(PORT_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_PORT);
        let host = settings
            .get_setting(HOST_KEY)
            .and_then(|v| {
                v.as_array()
                    .and_then(|items| current_choice(items).map(str::to_owned))
            })
            .unwrap_or_else(|| "localhost".to_owned());
        let command = settings
            .get_setting(COMMAND_KEY)
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| DEFAULT_COMMAND.to_owned());

        let mut spec = server_spec(&command, &host, port)?;
        if let Some(token) = settings.get_decrypted_setting(TOKEN_KEY) {
            if !token.is_empty() {
                spec = spec.env(TOKEN_ENV, token);
            }
        }

        let address = probe_address(&host, port);
        let probe = Arc::new(HttpProbe::new(address.clone()));
        let task = SupervisedTask::new(
            format!("{PLUGIN_NAME}-server"),
            spec,
            probe,
            TaskTimings::default(),
        );
        info!(%address, "web toolkit initialized");
        self.address = address;
        self.task = Some(task);
        Ok(true)
    }

    fn create_view(&mut self) -> Result<PluginView, PluginError> {
        let entries = TOOL_PAGES
            .iter()
            .map(|(label, path)| ViewLink {
                label: (*label).to_owned(),
                href: (*path).to_owned(),
            })
            .collect();
        Ok(PluginView::links("Web Toolkit", entries))
    }

    fn cleanup(&mut self) -> Result<(), PluginError> {
        if let Some(task) = self.task.take() {
            // Tears the control loop down; it stops any live child on
            // the way out.
            task.shutdown();
        }
        Ok(())
    }
}
