//! Plugin discovery.
//!
//! A scan walks the plugins root and produces one descriptor per
//! candidate directory, valid or not. Discovery never fails: a missing
//! registry entry, broken metadata, or an unreadable config document
//! yields a descriptor with `valid = false` and a diagnostic string,
//! so operators always see *why* a plugin is unusable instead of the
//! plugin silently vanishing.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error};

use deskhand_plugin::PluginRegistry;
use deskhand_types::ConfigRecord;

use crate::config_store::ConfigStore;

/// Directory names with this prefix are reserved and never scanned.
pub const RESERVED_PREFIX: &str = "_";

/// Subdirectory holding a plugin's locale documents, when present.
pub const TRANSLATIONS_DIR: &str = "translations";

/// Discovery-time snapshot of one plugin directory.
///
/// Ephemeral: recomputed on every scan, independent of load state.
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    /// Plugin name; the directory name.
    pub name: String,
    /// Human-readable name from the config record.
    pub display_name: String,
    /// Version string from the config record.
    pub version: String,
    /// Author attribution.
    pub author: String,
    /// One-line description.
    pub description: String,
    /// The persisted `enabled` flag.
    pub enabled: bool,
    /// Where the plugin's config document lives (or would live).
    pub config_path: PathBuf,
    /// The plugin's translations directory, when present.
    pub translations_path: Option<PathBuf>,
    /// Whether the plugin is loadable.
    pub valid: bool,
    /// Why the plugin is not loadable; non-empty iff `valid` is false.
    pub error: Option<String>,
}

impl PluginDescriptor {
    fn valid(name: String, record: &ConfigRecord, config_path: PathBuf, translations: Option<PathBuf>) -> Self {
        Self {
            name,
            display_name: record.plugin_info.display_name.clone(),
            version: record.plugin_info.version.clone(),
            author: record.plugin_info.author.clone(),
            description: record.plugin_info.description.clone(),
            enabled: record.enabled(),
            config_path,
            translations_path: translations,
            valid: true,
            error: None,
        }
    }

    fn invalid(name: String, config_path: PathBuf, error: String) -> Self {
        Self {
            name,
            display_name: String::new(),
            version: String::new(),
            author: String::new(),
            description: String::new(),
            enabled: false,
            config_path,
            translations_path: None,
            valid: false,
            error: Some(error),
        }
    }
}

/// Scan the plugins root, producing one descriptor per candidate
/// directory, sorted by name. Reserved-prefix directories are skipped;
/// everything else is listed, broken or not.
pub fn scan(root: &Path, registry: &PluginRegistry, store: &ConfigStore) -> Vec<PluginDescriptor> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            error!(root = %root.display(), %err, "plugins root is unreadable");
            return Vec::new();
        }
    };

    let mut descriptors = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with(RESERVED_PREFIX) {
            debug!(name, "skipping reserved directory");
            continue;
        }
        descriptors.push(probe(name, &path, registry, store));
    }
    descriptors.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(root = %root.display(), count = descriptors.len(), "discovery scan complete");
    descriptors
}

fn probe(
    name: &str,
    dir: &Path,
    registry: &PluginRegistry,
    store: &ConfigStore,
) -> PluginDescriptor {
    let config_path = store.config_path(name);

    let Some(spec) = registry.get(name) else {
        return PluginDescriptor::invalid(
            name.to_owned(),
            config_path,
            format!("no plugin entry registered for '{name}'"),
        );
    };

    let metadata = (spec.metadata)();
    if let Err(err) = metadata.validate() {
        return PluginDescriptor::invalid(name.to_owned(), config_path, err.to_string());
    }

    let record = match store.ensure(&metadata) {
        Ok(record) => record,
        Err(err) => {
            return PluginDescriptor::invalid(name.to_owned(), config_path, err.to_string());
        }
    };

    let translations = dir.join(TRANSLATIONS_DIR);
    let translations = translations.is_dir().then_some(translations);

    PluginDescriptor::valid(name.to_owned(), &record, config_path, translations)
}
