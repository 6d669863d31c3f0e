//! The demo plugin.
//!
//! The smallest useful plugin: it keeps a launch counter in its own
//! settings document and renders a greeting. Exists to exercise the
//! lifecycle and settings plumbing end to end, and as a template for
//! new plugins.

use serde_json::{json, Map};
use tracing::debug;

use deskhand_plugin::{
    HostContext, Plugin, PluginError, PluginMetadata, PluginSpec, PluginView,
};

/// Plugin name; matches the plugin's directory.
pub const PLUGIN_NAME: &str = "demo";

const GREETING_KEY: &str = "greeting";
const LAUNCH_COUNT_KEY: &str = "launch_count";

/// Registry entry for this plugin.
pub fn plugin_spec() -> PluginSpec {
    PluginSpec {
        metadata,
        build: |context| Box::new(DemoPlugin::new(context)),
    }
}

fn metadata() -> PluginMetadata {
    let mut defaults = Map::new();
    defaults.insert(GREETING_KEY.into(), json!("Hello from deskhand"));
    defaults.insert(LAUNCH_COUNT_KEY.into(), json!(0));
    PluginMetadata {
        name: PLUGIN_NAME.into(),
        display_name: "Demo".into(),
        description: "Settings persistence walkthrough".into(),
        version: "1.0.0".into(),
        author: "deskhand".into(),
        default_settings: defaults,
    }
}

/// The demo plugin instance.
pub struct DemoPlugin {
    context: HostContext,
    launches: u64,
}

impl DemoPlugin {
    fn new(context: HostContext) -> Self {
        Self {
            context,
            launches: 0,
        }
    }

    /// How many times this plugin has been loaded, per its settings.
    pub fn launches(&self) -> u64 {
        self.launches
    }
}

impl Plugin for DemoPlugin {
    fn metadata(&self) -> PluginMetadata {
        metadata()
    }

    fn initialize(&mut self) -> Result<bool, PluginError> {
        let count = self
            .context
            .setting_or(LAUNCH_COUNT_KEY, json!(0))
            .as_u64()
            .unwrap_or(0)
            + 1;
        self.context
            .settings()
            .set_setting(LAUNCH_COUNT_KEY, json!(count))?;
        debug!(count, "demo plugin launched");
        self.launches = count;
        Ok(true)
    }

    fn create_view(&mut self) -> Result<PluginView, PluginError> {
        let greeting = self
            .context
            .setting_or(GREETING_KEY, json!("Hello"))
            .as_str()
            .unwrap_or("Hello")
            .to_owned();
        Ok(PluginView::text(
            "Demo",
            format!("{greeting} (launch #{})", self.launches),
        ))
    }

    fn cleanup(&mut self) -> Result<(), PluginError> {
        self.context.status("demo plugin unloaded");
        Ok(())
    }
}
