use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("line {line}: expected `key=value`, found `{text}`")]
    MalformedLine { line: usize, text: String },

    #[error("failed to read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing required property `{0}`")]
    Missing(String),

    #[error("property `{key}`: unknown value `{value}`")]
    UnknownValue { key: String, value: String },

    #[error("property `{key}`: `{value}` is not a valid unsigned number")]
    InvalidNumber { key: String, value: String },

    #[error("property `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}
