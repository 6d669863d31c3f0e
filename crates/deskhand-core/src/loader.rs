//! The plugin loader.
//!
//! Resolves a name against the registry, instantiates the entry type
//! with its host handle, and drives `initialize()` and
//! `create_view()`. Any failure aborts the load atomically: the
//! half-built instance is dropped on the spot and nothing is
//! registered anywhere.

use tracing::debug;

use deskhand_plugin::{HostContext, Plugin, PluginError, PluginMetadata, PluginRegistry, PluginView};

/// A successfully loaded, initialized plugin with its first view.
pub struct LoadedPlugin {
    /// The entry type's metadata.
    pub metadata: PluginMetadata,
    /// The live instance.
    pub plugin: Box<dyn Plugin>,
    /// The view produced after initialization.
    pub view: PluginView,
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("name", &self.metadata.name)
            .finish_non_exhaustive()
    }
}

/// Load one plugin: resolve, validate, instantiate, initialize, and
/// build its first view.
pub fn load(
    registry: &PluginRegistry,
    name: &str,
    context: HostContext,
) -> Result<LoadedPlugin, PluginError> {
    let spec = registry
        .get(name)
        .ok_or_else(|| PluginError::ImportFailure(name.to_owned()))?;
    let metadata = (spec.metadata)();
    metadata.validate()?;

    let mut plugin = (spec.build)(context);
    match plugin.initialize() {
        Ok(true) => {}
        Ok(false) => {
            return Err(PluginError::InitializationFailure(format!(
                "'{name}' declined to initialize"
            )));
        }
        Err(err) => {
            return Err(PluginError::InitializationFailure(format!("'{name}': {err}")));
        }
    }

    let view = plugin.create_view()?;
    debug!(plugin = name, version = %metadata.version, "plugin loaded");
    Ok(LoadedPlugin {
        metadata,
        plugin,
        view,
    })
}
