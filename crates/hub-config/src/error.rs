//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not YAML, or does not have the hub's shape
    #[error("{path} is not a valid hub configuration")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A `!include` or `!env_var` tag could not be resolved
    #[error("{tag} in {path}: {message}")]
    Tag {
        tag: String,
        path: PathBuf,
        message: String,
    },

    #[error("{path} includes itself")]
    IncludeCycle { path: PathBuf },

    /// A setting or seed record holds a value the hub cannot run with
    #[error("{field}: {message}")]
    Validation { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn validation(field: impl Into<String>, message: impl ToString) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.to_string(),
        }
    }
}
