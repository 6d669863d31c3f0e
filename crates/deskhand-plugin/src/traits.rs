//! The plugin lifecycle contract and host service handles.
//!
//! A plugin entry type implements [`Plugin`]. The host instantiates it
//! with a [`HostContext`] carrying its settings handle and the host
//! window, then drives `initialize()` -> `create_view()` ->
//! `cleanup()` in that order. `initialize()` runs on the caller's
//! context and must not block on long I/O -- a plugin that needs a
//! background process owns a supervised task instead.

use std::sync::Arc;

use serde_json::{Map, Value};

use deskhand_types::config::{ENABLED_KEY, PluginInfo};
use deskhand_types::{ConfigError, Secret};

use crate::error::PluginError;
use crate::view::PluginView;

/// Static identity and defaults a plugin declares about itself.
///
/// This is the source for auto-generated config documents: a plugin
/// directory without a `config.json` gets one built from these fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginMetadata {
    /// Unique plugin name; must match the plugin's directory name.
    pub name: String,
    /// Human-readable name.
    pub display_name: String,
    /// One-line description.
    pub description: String,
    /// Semantic version string.
    pub version: String,
    /// Author attribution.
    pub author: String,
    /// Default settings seeded into a generated config document.
    /// An `enabled` key is added (as `false`) when absent.
    pub default_settings: Map<String, Value>,
}

impl PluginMetadata {
    /// Check the metadata satisfies the contract: non-empty name and
    /// display name, parseable semver version.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.name.is_empty() {
            return Err(PluginError::ContractViolation("name is empty".into()));
        }
        if self.display_name.is_empty() {
            return Err(PluginError::ContractViolation(format!(
                "'{}': display_name is empty",
                self.name
            )));
        }
        if semver::Version::parse(&self.version).is_err() {
            return Err(PluginError::ContractViolation(format!(
                "'{}': version '{}' is not valid semver",
                self.name, self.version
            )));
        }
        if let Some(v) = self.default_settings.get(ENABLED_KEY) {
            if !v.is_boolean() {
                return Err(PluginError::ContractViolation(format!(
                    "'{}': default '{ENABLED_KEY}' must be a boolean",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// The read-only identity block of the plugin's config document.
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            author: self.author.clone(),
        }
    }
}

/// Per-plugin settings access, as exposed to plugin code.
///
/// Implemented by the host's config store; every write persists
/// synchronously before returning.
pub trait SettingsStore: Send + Sync {
    /// Read one setting. `None` if the key is absent.
    fn get_setting(&self, key: &str) -> Option<Value>;

    /// Write one setting. Persists the whole document before returning.
    fn set_setting(&self, key: &str, value: Value) -> Result<(), ConfigError>;

    /// Read a secret-convention setting, decrypting transparently.
    ///
    /// On decryption failure the raw stored value is returned instead;
    /// for non-secret keys this behaves exactly like
    /// [`get_setting`](Self::get_setting).
    fn get_decrypted_setting(&self, key: &str) -> Option<Secret>;
}

/// Host window services available to plugins and the manager.
pub trait HostWindow: Send + Sync {
    /// Mount (or replace) the plugin's view on the host surface.
    fn mount_view(&self, plugin: &str, view: PluginView);

    /// Remove the plugin's view, if mounted.
    fn unmount_view(&self, plugin: &str);

    /// Show a transient status message attributed to the plugin.
    fn status_message(&self, plugin: &str, message: &str);
}

/// A window that discards everything. Used headless and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWindow;

impl HostWindow for NullWindow {
    fn mount_view(&self, plugin: &str, view: PluginView) {
        tracing::debug!(plugin, title = %view.title, "view mounted (null window)");
    }

    fn unmount_view(&self, _plugin: &str) {}

    fn status_message(&self, plugin: &str, message: &str) {
        tracing::debug!(plugin, message, "status (null window)");
    }
}

/// The handle a plugin instance receives at construction.
///
/// Everything a plugin may ask of its host flows through here; plugins
/// never reach into the manager directly.
#[derive(Clone)]
pub struct HostContext {
    plugin: String,
    settings: Arc<dyn SettingsStore>,
    window: Arc<dyn HostWindow>,
}

impl HostContext {
    /// Build a context for the named plugin.
    pub fn new(
        plugin: impl Into<String>,
        settings: Arc<dyn SettingsStore>,
        window: Arc<dyn HostWindow>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            settings,
            window,
        }
    }

    /// The owning plugin's name.
    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    /// The settings handle scoped to this plugin.
    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }

    /// The host window handle.
    pub fn window(&self) -> &dyn HostWindow {
        self.window.as_ref()
    }

    /// Convenience: read a setting, falling back to a default.
    pub fn setting_or(&self, key: &str, default: Value) -> Value {
        self.settings.get_setting(key).unwrap_or(default)
    }

    /// Convenience: show a status message attributed to this plugin.
    pub fn status(&self, message: &str) {
        self.window.status_message(&self.plugin, message);
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

/// The plugin lifecycle contract.
///
/// Call order is guaranteed: `initialize()` before `create_view()`,
/// and `cleanup()` happens-before the instance is dropped, so no late
/// callback can touch a freed instance.
pub trait Plugin: Send {
    /// The plugin's static metadata.
    fn metadata(&self) -> PluginMetadata;

    /// Prepare the plugin. `Ok(false)` is a polite decline; either it
    /// or an `Err` aborts the load as an initialization failure.
    fn initialize(&mut self) -> Result<bool, PluginError>;

    /// Build the view the host should mount. Called after a successful
    /// `initialize()`.
    fn create_view(&mut self) -> Result<PluginView, PluginError>;

    /// Release resources. Called exactly once at unload; the instance
    /// is removed from the host's table even if this fails.
    fn cleanup(&mut self) -> Result<(), PluginError>;
}
