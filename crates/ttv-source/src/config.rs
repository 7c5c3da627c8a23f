//! `ttv.toml` configuration.
//!
//! ```toml
//! [backend]
//! host = "http://localhost:5050"
//! vis_id = "TrustVis"
//!
//! [view]
//! base_point_size = 20.0
//! show_trail = false
//!
//! [prefetch]
//! radius = 2
//! ```
//!
//! Every key is optional; missing keys keep their defaults.

use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::{Deserialize, Serialize};
use ttv_core::{BASE_POINT_SIZE, COORD_PRECISION, PREFETCH_RADIUS, PrefetchPlanner, ViewSettings};

use crate::error::{Result, SourceError};

pub const CONFIG_FILE: &str = "ttv.toml";
pub const CONFIG_ENV: &str = "TTV_CONFIG";
pub const DATA_DIR_ENV: &str = "TTV_DATA_DIR";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub view: ViewConfig,
    pub prefetch: PrefetchConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the visualization backend. Unset reads from the content directory.
    pub host: Option<String>,
    pub vis_id: String,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: None,
            vis_id: "TrustVis".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub base_point_size: f64,
    pub precision: u32,
    pub show_index: bool,
    pub show_label: bool,
    pub show_trail: bool,
    pub show_background: bool,
    pub reveal_original_neighbors: bool,
    pub reveal_projection_neighbors: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        let settings = ViewSettings::default();
        Self {
            base_point_size: BASE_POINT_SIZE,
            precision: COORD_PRECISION,
            show_index: settings.show_index,
            show_label: settings.show_label,
            show_trail: settings.show_trail,
            show_background: settings.show_background,
            reveal_original_neighbors: settings.reveal_original_neighbors,
            reveal_projection_neighbors: settings.reveal_projection_neighbors,
        }
    }
}

impl ViewConfig {
    pub fn settings(&self) -> ViewSettings {
        ViewSettings {
            show_index: self.show_index,
            show_label: self.show_label,
            show_trail: self.show_trail,
            show_background: self.show_background,
            reveal_original_neighbors: self.reveal_original_neighbors,
            reveal_projection_neighbors: self.reveal_projection_neighbors,
            base_point_size: self.base_point_size,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    pub enabled: bool,
    pub radius: u32,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            radius: PREFETCH_RADIUS,
        }
    }
}

impl PrefetchConfig {
    pub fn planner(&self) -> PrefetchPlanner {
        PrefetchPlanner {
            enabled: self.enabled,
            radius: self.radius,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if !(self.view.base_point_size.is_finite() && self.view.base_point_size > 0.0) {
            return Err(SourceError::InvalidData(format!(
                "view.base_point_size must be positive, got {}",
                self.view.base_point_size
            )));
        }
        if self.view.precision > 12 {
            return Err(SourceError::InvalidData(format!(
                "view.precision must be at most 12, got {}",
                self.view.precision
            )));
        }
        Ok(())
    }

    /// Find and load the configuration.
    ///
    /// Priority: explicit path > `TTV_CONFIG` env > `<content>/ttv.toml` >
    /// built-in defaults. An explicit or env path that doesn't exist is an
    /// error; a missing file in the content directory is not.
    pub fn resolve(explicit: Option<&Path>, content: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let env_path = env::var_os(CONFIG_ENV).map(PathBuf::from);
        match config_path(explicit, env_path.as_deref(), content) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Ok((Self::load(&path)?, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }
}

/// Pick the config file to load, without reading it.
pub fn config_path(explicit: Option<&Path>, env_path: Option<&Path>, content: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit.or(env_path) {
        return Some(path.to_path_buf());
    }
    content
        .map(|dir| dir.join(CONFIG_FILE))
        .filter(|p| p.is_file())
}

/// Content directory: explicit path > `TTV_DATA_DIR` env > current directory.
pub fn resolve_content_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
