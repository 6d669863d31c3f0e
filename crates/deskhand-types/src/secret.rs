//! Secret value wrapper.
//!
//! [`Secret`] carries decrypted setting values (passwords, API tokens)
//! between the config store and the code that consumes them -- child
//! process environments, HTTP auth headers. It never prints or
//! serializes its contents.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A string that must not leak into logs, `Debug` output, or JSON.
///
/// - `Debug` and `Display` print `[redacted]`
/// - `Serialize` always emits `""`
/// - `Deserialize` accepts a plain string
/// - [`reveal()`](Secret::reveal) returns the inner value where it is
///   actually needed
#[derive(Clone, Default)]
pub struct Secret(String);

impl Secret {
    /// Wrap a value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The wrapped value. Call sites should hand the result straight to
    /// its consumer rather than storing it.
    pub fn reveal(&self) -> &str {
        &self.0
    }

    /// Whether the wrapped value is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // The value itself never round-trips through serialization.
        serializer.serialize_str("")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Secret(String::deserialize(deserializer)?))
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Secret(s)
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Secret(s.to_owned())
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
