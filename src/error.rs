//! Error types for the language service runtime.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while assembling a [`crate::ServiceConfig`].
///
/// These are the only failures surfaced to the embedding application; they are
/// detected when the service is built, never while serving requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Two entries of the same kind share an identifier.
    #[error("{kind} '{id}' is registered more than once")]
    Duplicate {
        /// What kind of entry was duplicated.
        kind: EntryKind,
        /// The duplicated identifier.
        id: String,
    },

    /// A plugin tried to use an identifier reserved by the runtime.
    #[error("plugin id '{id}' is reserved")]
    ReservedId {
        /// The reserved identifier.
        id: String,
    },
}

/// Kind of configuration entry, used in [`ConfigError`] messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A language module.
    Language,
    /// A capability provider.
    Plugin,
    /// A diagnostic rule.
    Rule,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Language => "language",
            Self::Plugin => "plugin",
            Self::Rule => "rule",
        };
        formatter.write_str(label)
    }
}

/// Errors raised while reading an `embedls.toml` settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file could not be read.
    #[error("failed to read settings file '{path}': {source}")]
    Io {
        /// Path of the settings file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the settings schema.
    #[error("failed to parse settings file '{path}': {source}")]
    Parse {
        /// Path of the settings file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
}

/// Failure of a single provider invocation.
///
/// The dispatcher isolates these: the failing provider contributes nothing and
/// its siblings still run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The provider panicked while computing its reply.
    #[error("provider panicked: {0}")]
    Panicked(String),
}

impl ProviderError {
    /// Builds a [`ProviderError::Failed`] from any message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Builds a [`ProviderError::Panicked`] from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }
}

/// Marker returned when a request was cancelled before its results were merged.
///
/// Cancellation is an early return, not a failure: nothing is logged as an
/// error and no partial result is guaranteed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("request cancelled")]
pub struct Cancelled;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_message_names_kind() {
        let error = ConfigError::Duplicate {
            kind: EntryKind::Rule,
            id: "no-unused".to_string(),
        };
        assert_eq!(error.to_string(), "rule 'no-unused' is registered more than once");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let error = ProviderError::from_panic(Box::new("boom"));
        assert_eq!(error, ProviderError::Panicked("boom".to_string()));

        let error = ProviderError::from_panic(Box::new(String::from("owned")));
        assert_eq!(error.to_string(), "provider panicked: owned");

        let error = ProviderError::from_panic(Box::new(42_u8));
        assert_eq!(error, ProviderError::Panicked("unknown panic payload".to_string()));
    }
}
