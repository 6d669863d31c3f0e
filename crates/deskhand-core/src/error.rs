//! Host-level error type.
//!
//! The manager surfaces exactly two failure families to its callers:
//! plugin failures (import, contract, initialization) and config
//! failures (I/O, parse, validation). Both are transparent wrappers so
//! the underlying message reaches the operator unchanged.

use thiserror::Error;

use deskhand_plugin::PluginError;
use deskhand_types::ConfigError;

/// Errors returned by lifecycle manager operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostError {
    /// A plugin load, unload, or runtime operation failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// A config document read or write failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience alias for manager operations.
pub type Result<T> = std::result::Result<T, HostError>;
