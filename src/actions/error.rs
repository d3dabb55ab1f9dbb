use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("could not read action rules `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed action rules: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("malformed action rules: {0}")]
    Json(#[from] serde_json::Error),
    #[error("action rule #{index} (primary 0x{primary:02x}): {reason}")]
    Invalid {
        index: usize,
        primary: u64,
        reason: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("could not start `{unit}`: {source}")]
    Spawn {
        unit: String,
        source: std::io::Error,
    },
    #[error("starting `{unit}` failed: {reason}")]
    Failed { unit: String, reason: String },
    #[error("could not raise event `{0}`")]
    Event(String),
}
