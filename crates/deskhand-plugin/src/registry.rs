//! The plugin registration table.
//!
//! Entry types are compiled into the host and registered here by name,
//! replacing runtime code imports with an explicit lookup: the loader
//! resolves a plugin directory's name against the registry, and an
//! unregistered name is an import failure on the plugin's descriptor,
//! never a host crash.

use std::collections::HashMap;

use crate::error::PluginError;
use crate::traits::{HostContext, Plugin, PluginMetadata};

/// Factory signature for constructing a plugin instance.
pub type PluginBuildFn = fn(HostContext) -> Box<dyn Plugin>;

/// One registered entry: static metadata plus a constructor.
///
/// `metadata` must be callable without side effects -- discovery probes
/// it for every scan, loaded or not.
#[derive(Clone, Copy)]
pub struct PluginSpec {
    /// Returns the entry type's static metadata.
    pub metadata: fn() -> PluginMetadata,
    /// Constructs the entry instance with its host handle.
    pub build: PluginBuildFn,
}

impl std::fmt::Debug for PluginSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSpec")
            .field("name", &(self.metadata)().name)
            .finish_non_exhaustive()
    }
}

/// Name-keyed table of registered plugin entries.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    specs: HashMap<String, PluginSpec>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry under its metadata name.
    ///
    /// An empty name or a duplicate registration is a contract
    /// violation. Other metadata problems (bad version, missing
    /// display name) are deliberately *not* rejected here: discovery
    /// must still be able to list the entry with a diagnostic.
    pub fn register(&mut self, spec: PluginSpec) -> Result<(), PluginError> {
        let name = (spec.metadata)().name;
        if name.is_empty() {
            return Err(PluginError::ContractViolation(
                "plugin metadata name is empty".into(),
            ));
        }
        if self.specs.contains_key(&name) {
            return Err(PluginError::ContractViolation(format!(
                "plugin '{name}' registered twice"
            )));
        }
        tracing::debug!(plugin = %name, "plugin entry registered");
        self.specs.insert(name, spec);
        Ok(())
    }

    /// Resolve a registered entry by name.
    pub fn get(&self, name: &str) -> Option<&PluginSpec> {
        self.specs.get(name)
    }

    /// Whether an entry is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Names of all registered entries, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.specs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
