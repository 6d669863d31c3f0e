//! Shared data model for the deskhand plugin host.
//!
//! This crate holds the types every other deskhand crate agrees on:
//!
//! - [`config`] -- the persisted per-plugin settings document
//!   ([`ConfigRecord`]) and the setting-key conventions.
//! - [`event`] -- host and task lifecycle events surfaced to observers.
//! - [`secret`] -- [`Secret`], a string wrapper that refuses to appear
//!   in logs or serialized output.
//! - [`error`] -- [`ConfigError`], the config I/O failure taxonomy.
//!
//! It deliberately has no async or I/O dependencies.

pub mod config;
pub mod error;
pub mod event;
pub mod secret;

pub use config::{ConfigRecord, PluginInfo};
pub use error::ConfigError;
pub use event::{HostEvent, TaskEvent};
pub use secret::Secret;
