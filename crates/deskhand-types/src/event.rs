//! Lifecycle events surfaced to observers.
//!
//! The host emits [`HostEvent`] values on its event bus; a supervised
//! task emits [`TaskEvent`] values on its own channel. Observers (a
//! window shell, the CLI, tests) subscribe and react; nothing in the
//! host waits on its observers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Events emitted by the plugin lifecycle manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    /// A plugin finished loading and its view was mounted.
    PluginLoaded { name: String },
    /// A plugin was removed from the loaded table.
    PluginUnloaded { name: String },
    /// A plugin operation failed; the message is operator-facing.
    PluginError { name: String, message: String },
    /// The persisted `enabled` flag was switched on.
    PluginEnabled { name: String },
    /// The persisted `enabled` flag was switched off.
    PluginDisabled { name: String },
    /// A setting write went through; carries the new settings map.
    PluginConfigChanged {
        name: String,
        settings: Map<String, Value>,
    },
}

impl HostEvent {
    /// The plugin this event concerns.
    pub fn plugin_name(&self) -> &str {
        match self {
            Self::PluginLoaded { name }
            | Self::PluginUnloaded { name }
            | Self::PluginError { name, .. }
            | Self::PluginEnabled { name }
            | Self::PluginDisabled { name }
            | Self::PluginConfigChanged { name, .. } => name,
        }
    }
}

/// Events emitted by a supervised process task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    /// The child passed its liveness probe; carries the probed address.
    Started { address: String },
    /// The child is gone: stopped on request or detected as exited.
    Stopped,
    /// Startup failed; carries captured diagnostics.
    Error { message: String },
}
