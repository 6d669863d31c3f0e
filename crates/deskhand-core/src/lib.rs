//! The deskhand plugin runtime.
//!
//! Ties the plugin contract to the filesystem and the host surface:
//!
//! - [`discovery`] -- scan the plugins root into descriptors, valid
//!   or invalid, without ever failing
//! - [`loader`] -- resolve, instantiate, and initialize one plugin
//!   atomically
//! - [`manager`] -- the [`PluginManager`]: the loaded-plugin table,
//!   enable/disable write-through, settings proxying, shutdown
//! - [`config_store`] -- whole-document JSON persistence with a
//!   per-plugin guard and secret encryption at rest
//! - [`crypto`] -- the [`SettingCipher`] behind `password_*` settings
//! - [`events`] -- the host's broadcast event bus

pub mod config_store;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod events;
pub mod loader;
pub mod manager;

pub use config_store::{ConfigStore, PluginSettings, CONFIG_FILE};
pub use crypto::{DecryptError, SettingCipher};
pub use discovery::{scan, PluginDescriptor};
pub use error::HostError;
pub use events::HostEventBus;
pub use loader::LoadedPlugin;
pub use manager::PluginManager;
