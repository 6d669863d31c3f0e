//! Plugin contract and registry for the deskhand host.
//!
//! A deskhand plugin is a self-contained extension: a directory with a
//! config document and optional translations, plus an entry type
//! compiled into the host and registered by name. This crate defines
//! everything a plugin author touches:
//!
//! - [`Plugin`] -- the lifecycle contract
//!   (`initialize` / `create_view` / `cleanup`)
//! - [`PluginMetadata`] -- static identity and default settings
//! - [`HostContext`] -- the plugin's window into host services
//!   (settings, the host window)
//! - [`PluginRegistry`] -- the name-keyed registration table the
//!   loader resolves entries from
//! - [`PluginError`] -- the load/runtime failure taxonomy

pub mod error;
pub mod registry;
pub mod traits;
pub mod view;

pub use error::PluginError;
pub use registry::{PluginRegistry, PluginSpec};
pub use traits::{HostContext, HostWindow, NullWindow, Plugin, PluginMetadata, SettingsStore};
pub use view::{PluginView, ViewBody, ViewLink};
