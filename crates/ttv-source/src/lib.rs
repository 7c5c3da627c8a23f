//! Epoch payload sources and `ttv.toml` configuration.

pub mod config;
pub mod error;
pub mod source;

pub use config::{Config, config_path, resolve_content_dir};
pub use error::{Result, SourceError};
pub use source::{DirSource, EpochSource};
