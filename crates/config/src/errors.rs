use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("toml: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Tried to traverse into a primitive.
    #[error("can't traverse into non-table key '{key}' at '{path}'")]
    TraverseNonTableAt { key: String, path: String },

    /// Invalid override string.
    #[error("invalid override: '{0}'")]
    InvalidOverride(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}
