//! Config-layer error types.
//!
//! [`ConfigError`] covers reading, parsing, validating, and writing the
//! per-plugin settings documents. Config mutations fail synchronously
//! with one of these variants; in-memory state is left untouched by the
//! caller on error.

use thiserror::Error;

/// Errors produced while reading or writing a plugin's config document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Underlying filesystem failure.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// The document exists but is not valid JSON, or has the wrong shape.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A setting value violates a convention (type, length, shape).
    #[error("invalid setting '{key}': {reason}")]
    InvalidValue {
        /// The offending setting key.
        key: String,
        /// What convention was violated.
        reason: String,
    },

    /// No config document exists for the named plugin.
    #[error("no config record for plugin '{0}'")]
    MissingRecord(String),
}

/// Convenience alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_value() {
        let err = ConfigError::InvalidValue {
            key: "server_host".into(),
            reason: "exceeds 100 characters".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid setting 'server_host': exceeds 100 characters"
        );
    }

    #[test]
    fn from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked");
        let err = ConfigError::from(io);
        assert!(matches!(err, ConfigError::Io(_)));
        assert!(err.to_string().contains("locked"));
    }

    #[test]
    fn from_json() {
        let parse = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err = ConfigError::from(parse);
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn display_missing_record() {
        let err = ConfigError::MissingRecord("alpha".into());
        assert_eq!(err.to_string(), "no config record for plugin 'alpha'");
    }
}
