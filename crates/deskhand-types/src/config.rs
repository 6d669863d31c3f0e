//! The persisted per-plugin settings document and its conventions.
//!
//! Each plugin directory owns one `config.json` with two blocks:
//!
//! ```json
//! {
//!   "plugin_info": { "name": "...", "display_name": "...", ... },
//!   "available_config": { "enabled": false, "...": "..." }
//! }
//! ```
//!
//! `plugin_info` is read-only metadata; `available_config` is the
//! mutable settings map. Setting types are conventions on the JSON
//! value and, for secrets and shortcuts, on the key name:
//!
//! - `bool` -- plain boolean
//! - string -- at most [`MAX_STRING_LEN`] characters
//! - integer -- JSON number
//! - ordered list -- the *last* element is the current default;
//!   re-selecting a value moves it to the tail
//! - secret -- key starts with [`SECRET_KEY_PREFIX`]; the stored value
//!   is ciphertext, decrypted only on read
//! - shortcut -- key starts with [`SHORTCUT_KEY_PREFIX`]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Setting keys with this prefix hold encrypted secret strings.
pub const SECRET_KEY_PREFIX: &str = "password_";

/// Setting keys with this prefix hold keyboard shortcut bindings.
pub const SHORTCUT_KEY_PREFIX: &str = "shortcut_";

/// The settings key that controls whether a plugin loads at startup.
pub const ENABLED_KEY: &str = "enabled";

/// Maximum length for plain string settings. Secret ciphertext is
/// exempt (encryption inflates the stored form).
pub const MAX_STRING_LEN: usize = 100;

/// Read-only identity block of a plugin's config document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Unique plugin name; matches the plugin's directory name.
    pub name: String,
    /// Human-readable name shown in the host window.
    pub display_name: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Semantic version string.
    pub version: String,
    /// Author attribution.
    #[serde(default)]
    pub author: String,
}

impl PluginInfo {
    /// Validate the identity block: non-empty name and a parseable
    /// semver version.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "plugin_info.name".into(),
                reason: "must not be empty".into(),
            });
        }
        if semver::Version::parse(&self.version).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "plugin_info.version".into(),
                reason: format!("'{}' is not valid semver", self.version),
            });
        }
        Ok(())
    }
}

/// One plugin's persisted settings document.
///
/// Always read and written as a whole; the host serializes access with
/// a per-plugin guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    /// Immutable identity block.
    pub plugin_info: PluginInfo,
    /// Mutable settings, including the `enabled` flag.
    #[serde(default)]
    pub available_config: Map<String, Value>,
}

impl ConfigRecord {
    /// Build a fresh record from plugin metadata and its declared
    /// default settings. Ensures an `enabled` key exists (defaulting to
    /// `false` when the plugin does not declare one).
    pub fn generated(info: PluginInfo, defaults: Map<String, Value>) -> Self {
        let mut available_config = defaults;
        available_config
            .entry(ENABLED_KEY.to_owned())
            .or_insert(Value::Bool(false));
        Self {
            plugin_info: info,
            available_config,
        }
    }

    /// Whether the plugin is flagged to load at startup.
    pub fn enabled(&self) -> bool {
        self.available_config
            .get(ENABLED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Flip the `enabled` flag in place.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.available_config
            .insert(ENABLED_KEY.to_owned(), Value::Bool(enabled));
    }

    /// Look up one setting.
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.available_config.get(key)
    }

    /// Insert one setting after validating it against the conventions.
    pub fn set_setting(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        validate_setting(key, &value)?;
        self.available_config.insert(key.to_owned(), value);
        Ok(())
    }
}

/// Whether a setting key names an encrypted secret.
pub fn is_secret_key(key: &str) -> bool {
    key.starts_with(SECRET_KEY_PREFIX)
}

/// Whether a setting key names a keyboard shortcut binding.
pub fn is_shortcut_key(key: &str) -> bool {
    key.starts_with(SHORTCUT_KEY_PREFIX)
}

/// Validate a setting value against the typed-key conventions.
///
/// Plain strings are capped at [`MAX_STRING_LEN`] characters. Secret
/// values are exempt from the cap. List values must be non-empty
/// arrays of strings.
pub fn validate_setting(key: &str, value: &Value) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            if !is_secret_key(key) && s.chars().count() > MAX_STRING_LEN {
                return Err(ConfigError::InvalidValue {
                    key: key.to_owned(),
                    reason: format!("string exceeds {MAX_STRING_LEN} characters"),
                });
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_owned(),
                    reason: "choice list must not be empty".into(),
                });
            }
            if items.iter().any(|v| !v.is_string()) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_owned(),
                    reason: "choice list elements must be strings".into(),
                });
            }
        }
        Value::Bool(_) | Value::Number(_) => {}
        other => {
            return Err(ConfigError::InvalidValue {
                key: key.to_owned(),
                reason: format!("unsupported setting type: {other}"),
            });
        }
    }
    Ok(())
}

/// The current default of an ordered-list setting: its last element.
pub fn current_choice(items: &[Value]) -> Option<&str> {
    items.last().and_then(Value::as_str)
}

/// Re-select a value in an ordered-list setting.
///
/// Moves `choice` to the tail so it becomes the new default. A choice
/// not already present is appended.
pub fn select_choice(items: &mut Vec<Value>, choice: &str) {
    items.retain(|v| v.as_str() != Some(choice));
    items.push(Value::String(choice.to_owned()));
}
