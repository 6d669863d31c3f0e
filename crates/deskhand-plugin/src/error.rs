//! Plugin error types.
//!
//! [`PluginError`] covers the three load-failure classes (import,
//! contract, initialization) plus runtime and config failures. A load
//! failure aborts exactly one plugin's load; it never cascades.

use thiserror::Error;

use deskhand_types::ConfigError;

/// Errors produced by plugin operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// The named entry could not be resolved from the registry.
    #[error("no plugin entry registered for '{0}'")]
    ImportFailure(String),

    /// The entry exists but violates the plugin contract
    /// (bad metadata, name mismatch, duplicate registration).
    #[error("plugin contract violation: {0}")]
    ContractViolation(String),

    /// `initialize()` returned `false` or failed.
    #[error("plugin initialization failed: {0}")]
    InitializationFailure(String),

    /// View construction failed.
    #[error("view creation failed: {0}")]
    ViewFailure(String),

    /// A config read/write failed underneath the plugin.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A failure inside the plugin's own operation.
    #[error("plugin runtime error: {0}")]
    Runtime(String),

    /// I/O failure during a plugin operation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;
