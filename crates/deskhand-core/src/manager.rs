//! The plugin lifecycle manager.
//!
//! Owns the name-to-instance table and orchestrates everything around
//! it: startup loading, load/unload, the persisted `enabled` flag,
//! settings proxying with secret decryption, and lifecycle events.
//! Load and unload run synchronously on the caller's context; a plugin
//! that needs long-running work owns a supervised task instead of
//! blocking `initialize()`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use deskhand_plugin::{
    HostContext, HostWindow, Plugin, PluginError, PluginMetadata, PluginRegistry,
};
use deskhand_types::{HostEvent, Secret};

use crate::config_store::{ConfigStore, PluginSettings};
use crate::crypto::SettingCipher;
use crate::discovery::{self, PluginDescriptor};
use crate::error::Result;
use crate::events::HostEventBus;
use crate::loader;

struct PluginInstance {
    plugin: Box<dyn Plugin>,
    metadata: PluginMetadata,
}

/// The host's plugin runtime.
pub struct PluginManager {
    root: PathBuf,
    registry: Arc<PluginRegistry>,
    store: Arc<ConfigStore>,
    window: Arc<dyn HostWindow>,
    events: HostEventBus,
    plugins: Mutex<HashMap<String, PluginInstance>>,
}

impl PluginManager {
    /// A manager over the given plugins root. The registry is fixed at
    /// construction; plugins are compiled in, not loaded from disk.
    pub fn new(
        root: impl Into<PathBuf>,
        registry: PluginRegistry,
        window: Arc<dyn HostWindow>,
        cipher: SettingCipher,
    ) -> Self {
        let root = root.into();
        let store = Arc::new(ConfigStore::new(root.clone(), cipher));
        Self {
            root,
            registry: Arc::new(registry),
            store,
            window,
            events: HostEventBus::new(),
            plugins: Mutex::new(HashMap::new()),
        }
    }

    /// The plugins root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The lifecycle event bus.
    pub fn events(&self) -> &HostEventBus {
        &self.events
    }

    /// The shared config store.
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Names of currently loaded plugins, sorted.
    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<_> = self.plugins.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether the named plugin is currently loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.plugins.lock().contains_key(name)
    }

    /// Scan the plugins root. Never fails; broken plugins come back as
    /// invalid descriptors with diagnostics.
    pub fn discover(&self) -> Vec<PluginDescriptor> {
        discovery::scan(&self.root, &self.registry, &self.store)
    }

    /// Load every discovered plugin whose `enabled` flag is set.
    ///
    /// One plugin's failure is logged and skipped; it never aborts the
    /// rest. Returns how many plugins were newly loaded.
    pub fn load_all(&self) -> usize {
        let mut count = 0;
        for descriptor in self.discover() {
            if !descriptor.valid {
                debug!(
                    plugin = %descriptor.name,
                    error = descriptor.error.as_deref().unwrap_or(""),
                    "skipping invalid plugin"
                );
                continue;
            }
            if !descriptor.enabled {
                continue;
            }
            match self.load(&descriptor.name) {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(plugin = %descriptor.name, %err, "startup load failed; continuing");
                }
            }
        }
        info!(count, "startup load complete");
        count
    }

    /// Load one plugin. Idempotent: a second load without an
    /// intervening unload is a successful no-op returning `false`.
    ///
    /// On success the instance is registered, its view is mounted, and
    /// a `PluginLoaded` event fires. On failure nothing is retained and
    /// a `PluginError` event fires.
    pub fn load(&self, name: &str) -> Result<bool> {
        let mut plugins = self.plugins.lock();
        if plugins.contains_key(name) {
            debug!(plugin = name, "already loaded");
            return Ok(false);
        }
        match self.load_locked(name, &mut plugins) {
            Ok(()) => {
                info!(plugin = name, "plugin loaded");
                self.events.emit(HostEvent::PluginLoaded { name: name.to_owned() });
                Ok(true)
            }
            Err(err) => {
                warn!(plugin = name, %err, "plugin load failed");
                self.events.emit(HostEvent::PluginError {
                    name: name.to_owned(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn load_locked(
        &self,
        name: &str,
        plugins: &mut HashMap<String, PluginInstance>,
    ) -> Result<()> {
        let spec = self
            .registry
            .get(name)
            .ok_or_else(|| PluginError::ImportFailure(name.to_owned()))?;
        // The config document must exist before the instance runs:
        // its settings handle reads through it immediately.
        self.store.ensure(&(spec.metadata)())?;

        let context = HostContext::new(
            name,
            Arc::new(PluginSettings::new(
                self.store.clone(),
                name,
                self.events.clone(),
            )),
            self.window.clone(),
        );
        let loaded = loader::load(&self.registry, name, context)?;
        self.window.mount_view(name, loaded.view);
        plugins.insert(
            name.to_owned(),
            PluginInstance {
                plugin: loaded.plugin,
                metadata: loaded.metadata,
            },
        );
        Ok(())
    }

    /// Unload one plugin. Returns `false` if it was not loaded.
    ///
    /// The instance is removed from the table unconditionally: a
    /// failing `cleanup()` is reported as a `PluginError` event but
    /// never leaves a zombie registration behind.
    pub fn unload(&self, name: &str) -> Result<bool> {
        let instance = self.plugins.lock().remove(name);
        let Some(mut instance) = instance else {
            debug!(plugin = name, "not loaded; nothing to unload");
            return Ok(false);
        };
        if let Err(err) = instance.plugin.cleanup() {
            warn!(plugin = name, %err, "cleanup failed; instance removed anyway");
            self.events.emit(HostEvent::PluginError {
                name: name.to_owned(),
                message: format!("cleanup failed: {err}"),
            });
        }
        self.window.unmount_view(name);
        info!(plugin = name, version = %instance.metadata.version, "plugin unloaded");
        self.events
            .emit(HostEvent::PluginUnloaded { name: name.to_owned() });
        Ok(true)
    }

    /// Enable a plugin: persist `enabled = true`, then load it.
    ///
    /// The flag is written first; if the write fails the operation
    /// aborts with nothing changed in memory. A load failure after a
    /// successful write leaves the flag set, so the plugin is retried
    /// at next startup.
    pub fn enable(&self, name: &str) -> Result<()> {
        self.store.set_enabled(name, true)?;
        self.events
            .emit(HostEvent::PluginEnabled { name: name.to_owned() });
        self.load(name)?;
        Ok(())
    }

    /// Disable a plugin: persist `enabled = false`, then unload it.
    pub fn disable(&self, name: &str) -> Result<()> {
        self.store.set_enabled(name, false)?;
        self.events
            .emit(HostEvent::PluginDisabled { name: name.to_owned() });
        self.unload(name)?;
        Ok(())
    }

    /// Read one setting as stored.
    pub fn get_setting(&self, name: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.store.get_setting(name, key)?)
    }

    /// Validate and persist one setting, then emit `PluginConfigChanged`
    /// with the new settings map. Persistence is synchronous: when this
    /// returns, the document on disk already carries the write.
    pub fn set_setting(&self, name: &str, key: &str, value: Value) -> Result<()> {
        let settings = self.store.set_setting(name, key, value)?;
        self.events.emit(HostEvent::PluginConfigChanged {
            name: name.to_owned(),
            settings,
        });
        Ok(())
    }

    /// Read one setting with transparent secret decryption. Decryption
    /// failure degrades to the raw stored value; non-secret keys come
    /// back unchanged.
    pub fn get_decrypted_setting(&self, name: &str, key: &str) -> Result<Option<Secret>> {
        Ok(self.store.get_decrypted(name, key)?)
    }

    /// Re-select a value in an ordered-list setting and emit
    /// `PluginConfigChanged`.
    pub fn select_choice(&self, name: &str, key: &str, choice: &str) -> Result<()> {
        let settings = self.store.select_choice(name, key, choice)?;
        self.events.emit(HostEvent::PluginConfigChanged {
            name: name.to_owned(),
            settings,
        });
        Ok(())
    }

    /// Unload every loaded plugin, tolerating per-plugin failures.
    pub fn shutdown(&self) {
        for name in self.loaded() {
            if let Err(err) = self.unload(&name) {
                warn!(plugin = %name, %err, "unload during shutdown failed");
            }
        }
        info!("plugin manager shut down");
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("root", &self.root)
            .field("loaded", &self.loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskhand_plugin::{NullWindow, PluginSpec, PluginView};
    use deskhand_types::config::ENABLED_KEY;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    static INIT_CALLS: AtomicU32 = AtomicU32::new(0);
    static CLEANUP_CALLS: AtomicU32 = AtomicU32::new(0);

    struct Demo;

    impl Plugin for Demo {
        fn metadata(&self) -> PluginMetadata {
            demo_metadata()
        }
        fn initialize(&mut self) -> std::result::Result<bool, PluginError> {
            INIT_CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        fn create_view(&mut self) -> std::result::Result<PluginView, PluginError> {
            Ok(PluginView::text("Demo", "hello"))
        }
        fn cleanup(&mut self) -> std::result::Result<(), PluginError> {
            CLEANUP_CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Grumpy;

    impl Plugin for Grumpy {
        fn metadata(&self) -> PluginMetadata {
            grumpy_metadata()
        }
        fn initialize(&mut self) -> std::result::Result<bool, PluginError> {
            Ok(true)
        }
        fn create_view(&mut self) -> std::result::Result<PluginView, PluginError> {
            Ok(PluginView::text("Grumpy", ""))
        }
        fn cleanup(&mut self) -> std::result::Result<(), PluginError> {
            Err(PluginError::Runtime("cleanup exploded".into()))
        }
    }

    fn demo_metadata() -> PluginMetadata {
        let mut defaults = Map::new();
        defaults.insert("port".into(), json!(8501));
        PluginMetadata {
            name: "demo".into(),
            display_name: "Demo".into(),
            description: String::new(),
            version: "1.0.0".into(),
            author: String::new(),
            default_settings: defaults,
        }
    }

    fn grumpy_metadata() -> PluginMetadata {
        PluginMetadata {
            name: "grumpy".into(),
            display_name: "Grumpy".into(),
            description: String::new(),
            version: "1.0.0".into(),
            author: String::new(),
            default_settings: Map::new(),
        }
    }

    fn manager(dir: &TempDir) -> PluginManager {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginSpec {
                metadata: demo_metadata,
                build: |_| Box::new(Demo),
            })
            .unwrap();
        registry
            .register(PluginSpec {
                metadata: grumpy_metadata,
                build: |_| Box::new(Grumpy),
            })
            .unwrap();
        for name in ["demo", "grumpy"] {
            std::fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        PluginManager::new(
            dir.path(),
            registry,
            Arc::new(NullWindow),
            SettingCipher::new("test-salt"),
        )
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<HostEvent>) -> Vec<HostEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn load_is_idempotent_with_one_loaded_event() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let mut rx = mgr.events().subscribe();

        assert!(mgr.load("demo").unwrap());
        assert!(!mgr.load("demo").unwrap());
        assert_eq!(mgr.loaded(), vec!["demo".to_string()]);

        let loaded: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|ev| matches!(ev, HostEvent::PluginLoaded { .. }))
            .collect();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn load_of_unregistered_name_fails_and_registers_nothing() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let mut rx = mgr.events().subscribe();

        let err = mgr.load("alpha").unwrap_err();
        assert!(err.to_string().contains("no plugin entry"));
        assert!(!mgr.is_loaded("alpha"));
        assert!(drain(&mut rx)
            .iter()
            .any(|ev| matches!(ev, HostEvent::PluginError { name, .. } if name == "alpha")));
    }

    #[test]
    fn unload_removes_the_instance_even_when_cleanup_fails() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.load("grumpy").unwrap();
        let mut rx = mgr.events().subscribe();

        assert!(mgr.unload("grumpy").unwrap());
        assert!(!mgr.is_loaded("grumpy"));

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|ev| matches!(ev, HostEvent::PluginError { .. })));
        assert!(events
            .iter()
            .any(|ev| matches!(ev, HostEvent::PluginUnloaded { .. })));

        // Unloading again is a no-op.
        assert!(!mgr.unload("grumpy").unwrap());
    }

    #[test]
    fn enable_persists_then_loads_and_disable_reverses() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.store().ensure(&demo_metadata()).unwrap();

        mgr.enable("demo").unwrap();
        assert!(mgr.is_loaded("demo"));
        assert!(mgr.store().enabled("demo").unwrap());

        mgr.disable("demo").unwrap();
        assert!(!mgr.is_loaded("demo"));
        assert!(!mgr.store().enabled("demo").unwrap());
    }

    #[test]
    fn enable_then_disable_leaves_other_settings_identical() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.store().ensure(&demo_metadata()).unwrap();
        mgr.set_setting("demo", "note", json!("keep me")).unwrap();
        let mut before = mgr.store().settings("demo").unwrap();
        before.remove(ENABLED_KEY);

        mgr.enable("demo").unwrap();
        mgr.disable("demo").unwrap();

        let mut after = mgr.store().settings("demo").unwrap();
        after.remove(ENABLED_KEY);
        assert_eq!(before, after);
    }

    #[test]
    fn enable_of_unknown_plugin_fails_before_any_load() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        assert!(mgr.enable("ghost").is_err());
        assert!(!mgr.is_loaded("ghost"));
    }

    #[test]
    fn load_all_loads_only_enabled_plugins_and_tolerates_failures() {
        let dir = TempDir::new().unwrap();
        // An unregistered directory must not derail the rest.
        std::fs::create_dir_all(dir.path().join("alpha")).unwrap();
        let mgr = manager(&dir);
        mgr.store().ensure(&demo_metadata()).unwrap();
        mgr.store().ensure(&grumpy_metadata()).unwrap();
        mgr.store().set_enabled("demo", true).unwrap();

        assert_eq!(mgr.load_all(), 1);
        assert_eq!(mgr.loaded(), vec!["demo".to_string()]);
    }

    #[test]
    fn set_setting_emits_config_changed() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.store().ensure(&demo_metadata()).unwrap();
        let mut rx = mgr.events().subscribe();

        mgr.set_setting("demo", "port", json!(9000)).unwrap();
        match rx.try_recv().unwrap() {
            HostEvent::PluginConfigChanged { name, settings } => {
                assert_eq!(name, "demo");
                assert_eq!(settings.get("port"), Some(&json!(9000)));
            }
            other => panic!("expected PluginConfigChanged, got {other:?}"),
        }
    }

    #[test]
    fn decrypted_read_matches_plain_read_for_non_secrets() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.store().ensure(&demo_metadata()).unwrap();
        mgr.set_setting("demo", "note", json!("plain")).unwrap();

        let plain = mgr.get_setting("demo", "note").unwrap().unwrap();
        let decrypted = mgr.get_decrypted_setting("demo", "note").unwrap().unwrap();
        assert_eq!(plain.as_str().unwrap(), decrypted.reveal());
    }

    #[test]
    fn shutdown_unloads_everything() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        mgr.load("demo").unwrap();
        mgr.load("grumpy").unwrap();

        mgr.shutdown();
        assert!(mgr.loaded().is_empty());
    }
}
