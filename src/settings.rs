//! Settings for rendering, importing and serving.
//!
//! `defaults/strata.default.toml` is embedded so the binary always has a
//! complete configuration. A [`Loader`] layers files, environment variables
//! and explicit overrides over those defaults before deserializing.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat, ValueKind};
use serde::Deserialize;
use std::path::Path;

use crate::error::Result;

const DEFAULT_TOML: &str = include_str!("../defaults/strata.default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub render: RenderSettings,
    pub import: ImportSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderSettings {
    pub max_recursive_render_depth: usize,
    pub render_null_as: String,
    pub date_format: String,
    pub date_time_format: String,
    pub locale: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportSettings {
    pub workers: usize,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self { workers: 2, timeout_ms: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct Loader {
    builder: ConfigBuilder<DefaultState>,
}

impl Loader {
    pub fn new() -> Self {
        let builder = Config::builder().add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml));
        Self { builder }
    }

    /// Layer a configuration file. Missing files trigger an error.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref()).format(FileFormat::Toml).required(true);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Layer an optional configuration file (ignored if the file is absent).
    pub fn with_optional_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref()).format(FileFormat::Toml).required(false);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Layer `STRATA__RENDER__MAX_RECURSIVE_RENDER_DEPTH` style variables.
    pub fn with_environment(mut self) -> Self {
        let source = Environment::with_prefix("STRATA").prefix_separator("__").separator("__").try_parsing(true);
        self.builder = self.builder.add_source(source);
        self
    }

    pub fn set_override<I>(mut self, key: &str, value: I) -> Result<Self>
    where
        I: Into<ValueKind>,
    {
        self.builder = self.builder.set_override(key, value)?;
        Ok(self)
    }

    pub fn build(self) -> Result<Settings> {
        Ok(self.builder.build()?.try_deserialize()?)
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

pub fn load_defaults() -> Result<Settings> {
    Loader::new().build()
}
