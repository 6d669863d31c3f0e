//! Per-plugin config persistence.
//!
//! Each plugin directory under the plugins root owns one `config.json`
//! read and written as a whole document. Writes go through a
//! per-plugin guard so concurrent mutations of one document serialize;
//! documents for different plugins are independent. The store also
//! owns the setting cipher: secret-convention values are encrypted on
//! write and decrypted only through [`ConfigStore::get_decrypted`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use deskhand_plugin::{PluginMetadata, SettingsStore};
use deskhand_types::config::{is_secret_key, select_choice};
use deskhand_types::{ConfigError, ConfigRecord, HostEvent, Secret};

use crate::crypto::SettingCipher;
use crate::events::HostEventBus;

/// File name of a plugin's config document inside its directory.
pub const CONFIG_FILE: &str = "config.json";

/// The host's view over every plugin's config document.
pub struct ConfigStore {
    root: PathBuf,
    cipher: SettingCipher,
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConfigStore {
    /// A store over the given plugins root.
    pub fn new(root: impl Into<PathBuf>, cipher: SettingCipher) -> Self {
        Self {
            root: root.into(),
            cipher,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// The plugins root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the named plugin's config document lives.
    pub fn config_path(&self, plugin: &str) -> PathBuf {
        self.root.join(plugin).join(CONFIG_FILE)
    }

    fn guard(&self, plugin: &str) -> Arc<Mutex<()>> {
        self.guards
            .lock()
            .entry(plugin.to_owned())
            .or_default()
            .clone()
    }

    fn read_unlocked(&self, plugin: &str) -> Result<ConfigRecord, ConfigError> {
        let path = self.config_path(plugin);
        if !path.exists() {
            return Err(ConfigError::MissingRecord(plugin.to_owned()));
        }
        let text = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Replace-by-rename so a crash mid-write never truncates the
    /// document.
    fn write_unlocked(&self, plugin: &str, record: &ConfigRecord) -> Result<(), ConfigError> {
        let path = self.config_path(plugin);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(record)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, text)?;
        fs::rename(&staging, &path)?;
        debug!(plugin, path = %path.display(), "config written");
        Ok(())
    }

    /// Read the plugin's whole config record.
    pub fn read(&self, plugin: &str) -> Result<ConfigRecord, ConfigError> {
        let guard = self.guard(plugin);
        let _held = guard.lock();
        self.read_unlocked(plugin)
    }

    /// Write the plugin's whole config record.
    pub fn write(&self, plugin: &str, record: &ConfigRecord) -> Result<(), ConfigError> {
        let guard = self.guard(plugin);
        let _held = guard.lock();
        self.write_unlocked(plugin, record)
    }

    /// Read the plugin's record, generating one from its metadata when
    /// the document is missing. Declared secret defaults are encrypted
    /// before the generated document touches disk.
    pub fn ensure(&self, metadata: &PluginMetadata) -> Result<ConfigRecord, ConfigError> {
        let guard = self.guard(&metadata.name);
        let _held = guard.lock();
        match self.read_unlocked(&metadata.name) {
            Ok(record) => Ok(record),
            Err(ConfigError::MissingRecord(_)) => {
                let mut defaults = metadata.default_settings.clone();
                for (key, value) in defaults.iter_mut() {
                    *value = self.seal_secret(key, value.clone());
                }
                let record = ConfigRecord::generated(metadata.info(), defaults);
                self.write_unlocked(&metadata.name, &record)?;
                info!(plugin = %metadata.name, "config document generated from metadata");
                Ok(record)
            }
            Err(err) => Err(err),
        }
    }

    /// The plugin's current settings map.
    pub fn settings(&self, plugin: &str) -> Result<Map<String, Value>, ConfigError> {
        Ok(self.read(plugin)?.available_config)
    }

    /// The persisted `enabled` flag.
    pub fn enabled(&self, plugin: &str) -> Result<bool, ConfigError> {
        Ok(self.read(plugin)?.enabled())
    }

    /// Persist the `enabled` flag, leaving every other setting
    /// untouched.
    pub fn set_enabled(&self, plugin: &str, enabled: bool) -> Result<(), ConfigError> {
        let guard = self.guard(plugin);
        let _held = guard.lock();
        let mut record = self.read_unlocked(plugin)?;
        record.set_enabled(enabled);
        self.write_unlocked(plugin, &record)
    }

    /// Read one setting as stored (secrets stay ciphertext here).
    pub fn get_setting(&self, plugin: &str, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.read(plugin)?.setting(key).cloned())
    }

    /// Validate and persist one setting, returning the new settings
    /// map. Secret-convention string values are encrypted before they
    /// touch disk.
    pub fn set_setting(
        &self,
        plugin: &str,
        key: &str,
        value: Value,
    ) -> Result<Map<String, Value>, ConfigError> {
        let guard = self.guard(plugin);
        let _held = guard.lock();
        let mut record = self.read_unlocked(plugin)?;
        record.set_setting(key, self.seal_secret(key, value))?;
        self.write_unlocked(plugin, &record)?;
        Ok(record.available_config)
    }

    /// Re-select a value in an ordered-list setting, persisting the new
    /// order. The selected value becomes the list's tail, i.e. the
    /// current default.
    pub fn select_choice(
        &self,
        plugin: &str,
        key: &str,
        choice: &str,
    ) -> Result<Map<String, Value>, ConfigError> {
        let guard = self.guard(plugin);
        let _held = guard.lock();
        let mut record = self.read_unlocked(plugin)?;
        let Some(Value::Array(items)) = record.available_config.get_mut(key) else {
            return Err(ConfigError::InvalidValue {
                key: key.to_owned(),
                reason: "not an ordered-list setting".into(),
            });
        };
        select_choice(items, choice);
        self.write_unlocked(plugin, &record)?;
        Ok(record.available_config)
    }

    /// Read one setting with transparent decryption.
    ///
    /// For secret-convention keys the stored token is decrypted; when
    /// decryption fails the failure is logged and the raw stored value
    /// is returned instead, so a lost salt degrades rather than
    /// breaking the plugin. Non-secret keys come back exactly as
    /// [`get_setting`](Self::get_setting) returns them.
    pub fn get_decrypted(&self, plugin: &str, key: &str) -> Result<Option<Secret>, ConfigError> {
        Ok(self
            .get_setting(plugin, key)?
            .map(|value| self.open_secret(plugin, key, value)))
    }

    fn seal_secret(&self, key: &str, value: Value) -> Value {
        match value {
            Value::String(s) if is_secret_key(key) && !SettingCipher::is_encrypted(&s) => {
                Value::String(self.cipher.encrypt(&s))
            }
            other => other,
        }
    }

    fn open_secret(&self, plugin: &str, key: &str, value: Value) -> Secret {
        match value {
            Value::String(s) if is_secret_key(key) && SettingCipher::is_encrypted(&s) => {
                match self.cipher.decrypt(&s) {
                    Ok(plaintext) => Secret::new(plaintext),
                    Err(err) => {
                        warn!(plugin, key, %err, "secret decryption failed; returning stored value");
                        Secret::new(s)
                    }
                }
            }
            Value::String(s) => Secret::new(s),
            other => Secret::new(other.to_string()),
        }
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// One plugin's settings handle, as handed to plugin code.
///
/// Thin adapter over the shared store scoped to a single plugin name;
/// writes emit `PluginConfigChanged` on the host bus.
pub struct PluginSettings {
    store: Arc<ConfigStore>,
    plugin: String,
    events: HostEventBus,
}

impl PluginSettings {
    /// A handle scoped to the named plugin.
    pub fn new(store: Arc<ConfigStore>, plugin: impl Into<String>, events: HostEventBus) -> Self {
        Self {
            store,
            plugin: plugin.into(),
            events,
        }
    }
}

impl SettingsStore for PluginSettings {
    fn get_setting(&self, key: &str) -> Option<Value> {
        match self.store.get_setting(&self.plugin, key) {
            Ok(value) => value,
            Err(err) => {
                warn!(plugin = %self.plugin, key, %err, "setting read failed");
                None
            }
        }
    }

    fn set_setting(&self, key: &str, value: Value) -> Result<(), ConfigError> {
        let settings = self.store.set_setting(&self.plugin, key, value)?;
        self.events.emit(HostEvent::PluginConfigChanged {
            name: self.plugin.clone(),
            settings,
        });
        Ok(())
    }

    fn get_decrypted_setting(&self, key: &str) -> Option<Secret> {
        match self.store.get_decrypted(&self.plugin, key) {
            Ok(value) => value,
            Err(err) => {
                warn!(plugin = %self.plugin, key, %err, "setting read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskhand_types::config::{current_choice, MAX_STRING_LEN};
    use serde_json::json;
    use tempfile::TempDir;

    fn metadata(name: &str) -> PluginMetadata {
        let mut defaults = Map::new();
        defaults.insert("port".into(), json!(8501));
        defaults.insert("password_api_token".into(), json!("plain-default"));
        PluginMetadata {
            name: name.into(),
            display_name: "Demo".into(),
            description: String::new(),
            version: "1.0.0".into(),
            author: "tests".into(),
            default_settings: defaults,
        }
    }

    fn store(dir: &TempDir) -> Arc<ConfigStore> {
        Arc::new(ConfigStore::new(dir.path(), SettingCipher::new("test-salt")))
    }

    #[test]
    fn missing_document_is_missing_record() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(matches!(
            store.read("ghost"),
            Err(ConfigError::MissingRecord(_))
        ));
    }

    #[test]
    fn ensure_generates_and_is_stable() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let record = store.ensure(&metadata("demo")).unwrap();
        assert!(!record.enabled());
        assert_eq!(record.setting("port"), Some(&json!(8501)));
        assert!(store.config_path("demo").exists());

        // A second ensure reads the existing document instead of
        // regenerating it.
        store.set_enabled("demo", true).unwrap();
        let again = store.ensure(&metadata("demo")).unwrap();
        assert!(again.enabled());
    }

    #[test]
    fn generated_secret_defaults_are_encrypted_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure(&metadata("demo")).unwrap();

        let text = fs::read_to_string(store.config_path("demo")).unwrap();
        assert!(!text.contains("plain-default"));
        let stored = store.get_setting("demo", "password_api_token").unwrap().unwrap();
        assert!(SettingCipher::is_encrypted(stored.as_str().unwrap()));
        let secret = store.get_decrypted("demo", "password_api_token").unwrap().unwrap();
        assert_eq!(secret.reveal(), "plain-default");
    }

    #[test]
    fn set_setting_persists_synchronously() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure(&metadata("demo")).unwrap();
        store.set_setting("demo", "port", json!(9000)).unwrap();

        // A fresh store over the same root sees the write.
        let fresh = ConfigStore::new(dir.path(), SettingCipher::new("test-salt"));
        assert_eq!(fresh.get_setting("demo", "port").unwrap(), Some(json!(9000)));
    }

    #[test]
    fn invalid_values_leave_the_document_untouched() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure(&metadata("demo")).unwrap();
        let before = store.settings("demo").unwrap();

        let long = "x".repeat(MAX_STRING_LEN + 1);
        assert!(store.set_setting("demo", "note", json!(long)).is_err());
        assert!(store.set_setting("demo", "blob", json!({"k": 1})).is_err());
        assert_eq!(store.settings("demo").unwrap(), before);
    }

    #[test]
    fn secret_values_are_encrypted_on_write_and_decrypted_on_read() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure(&metadata("demo")).unwrap();
        store
            .set_setting("demo", "password_api_token", json!("hunter2"))
            .unwrap();

        let stored = store.get_setting("demo", "password_api_token").unwrap().unwrap();
        assert!(SettingCipher::is_encrypted(stored.as_str().unwrap()));
        let secret = store.get_decrypted("demo", "password_api_token").unwrap().unwrap();
        assert_eq!(secret.reveal(), "hunter2");
    }

    #[test]
    fn decrypt_failure_returns_the_stored_value() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure(&metadata("demo")).unwrap();
        store
            .set_setting("demo", "password_api_token", json!("hunter2"))
            .unwrap();

        // Same documents, different salt: decryption must fail but the
        // read still answers with the stored token.
        let other = ConfigStore::new(dir.path(), SettingCipher::new("other-salt"));
        let raw = other
            .get_decrypted("demo", "password_api_token")
            .unwrap()
            .unwrap();
        assert!(SettingCipher::is_encrypted(raw.reveal()));
    }

    #[test]
    fn decrypted_read_of_non_secret_matches_plain_read() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure(&metadata("demo")).unwrap();
        store.set_setting("demo", "note", json!("plain")).unwrap();

        let plain = store.get_setting("demo", "note").unwrap().unwrap();
        let decrypted = store.get_decrypted("demo", "note").unwrap().unwrap();
        assert_eq!(plain.as_str().unwrap(), decrypted.reveal());
    }

    #[test]
    fn choice_selection_moves_to_tail_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure(&metadata("demo")).unwrap();
        store
            .set_setting("demo", "server_host", json!(["0.0.0.0", "localhost"]))
            .unwrap();

        store.select_choice("demo", "server_host", "0.0.0.0").unwrap();
        let stored = store.get_setting("demo", "server_host").unwrap().unwrap();
        let items = stored.as_array().unwrap();
        assert_eq!(current_choice(items), Some("0.0.0.0"));

        assert!(store.select_choice("demo", "port", "x").is_err());
    }

    #[test]
    fn set_enabled_leaves_other_settings_byte_identical() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure(&metadata("demo")).unwrap();
        store.set_setting("demo", "port", json!(9000)).unwrap();
        let mut before = store.settings("demo").unwrap();
        before.remove("enabled");

        store.set_enabled("demo", true).unwrap();
        store.set_enabled("demo", false).unwrap();
        let mut after = store.settings("demo").unwrap();
        after.remove("enabled");
        assert_eq!(before, after);
    }

    #[test]
    fn plugin_settings_adapter_emits_config_changed() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.ensure(&metadata("demo")).unwrap();

        let bus = HostEventBus::new();
        let mut rx = bus.subscribe();
        let settings = PluginSettings::new(store, "demo", bus);

        settings.set_setting("port", json!(9000)).unwrap();
        match rx.try_recv().unwrap() {
            HostEvent::PluginConfigChanged { name, settings } => {
                assert_eq!(name, "demo");
                assert_eq!(settings.get("port"), Some(&json!(9000)));
            }
            other => panic!("expected PluginConfigChanged, got {other:?}"),
        }
        assert_eq!(settings.get_setting("port"), Some(json!(9000)));
        assert!(settings.get_setting("ghost").is_none());
    }
}
