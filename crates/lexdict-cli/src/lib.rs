pub mod combined;
pub mod commands;
pub mod trace_init;

use lexdict_core::dict::DictError;
use lexdict_core::settings::SettingsError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Dict(#[from] DictError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no such word: {0}")]
    NotFound(String),
}
