use std::fmt;
use std::io;
use std::path::PathBuf;

use ttv_core::EpochId;

#[derive(Debug)]
pub enum SourceError {
    Io { path: PathBuf, source: io::Error },
    Json(serde_json::Error),
    Toml(toml::de::Error),
    EpochNotFound(EpochId),
    InvalidData(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            SourceError::Json(e) => write!(f, "invalid JSON: {e}"),
            SourceError::Toml(e) => write!(f, "invalid config: {e}"),
            SourceError::EpochNotFound(epoch) => write!(f, "epoch {epoch} not found"),
            SourceError::InvalidData(msg) => write!(f, "invalid data: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Io { source, .. } => Some(source),
            SourceError::Json(e) => Some(e),
            SourceError::Toml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Json(e)
    }
}

impl From<toml::de::Error> for SourceError {
    fn from(e: toml::de::Error) -> Self {
        SourceError::Toml(e)
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
