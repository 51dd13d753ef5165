//! Resolver configuration (urlimport.toml)
//!
//! Configuration can be built in code or read from a TOML file:
//!
//! ```toml
//! search_paths = ["https://example.com/modules", "https://mirror.example.com/py/"]
//! download_path = "vendor"
//! allowed_modules = ["regular_module", "file_module"]
//! update_search_path = true
//! extension = "py"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up by [`find_config`]
pub const CONFIG_FILE_NAME: &str = "urlimport.toml";

/// Default source file extension
pub const DEFAULT_EXTENSION: &str = "py";

/// Errors that can occur while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// No search path configured
    #[error("At least one search path is required")]
    NoSearchPaths,

    /// Search path is not a usable base URL
    #[error("Invalid search path '{path}': {reason}")]
    InvalidSearchPath { path: String, reason: String },

    /// Extension is empty or contains a dot
    #[error("Invalid extension: {0:?}")]
    InvalidExtension(String),

    /// Extension differs from the one the native loader recognizes
    #[error("Extension '{found}' does not match the loader's extension '{expected}'")]
    ExtensionMismatch { expected: String, found: String },

    /// Allowed module is not a valid top-level name
    #[error("Invalid allowed module: {0}")]
    InvalidModule(#[from] crate::name::NameError),
}

/// Configuration for a remote resolver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolverConfig {
    /// Base URLs searched in order
    pub search_paths: Vec<String>,

    /// Local directory downloaded modules are written to (default: current directory)
    #[serde(default)]
    pub download_path: PathBuf,

    /// Top-level names allowed to resolve remotely (absent = unrestricted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_modules: Option<Vec<String>>,

    /// Append `download_path` to the local search list on registration
    #[serde(default = "default_update_search_path")]
    pub update_search_path: bool,

    /// Source file extension, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_update_search_path() -> bool {
    true
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

impl ResolverConfig {
    /// Create a configuration with a single base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_search_paths([base_url])
    }

    /// Create a configuration with several base URLs
    pub fn with_search_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            search_paths: paths.into_iter().map(Into::into).collect(),
            download_path: PathBuf::new(),
            allowed_modules: None,
            update_search_path: default_update_search_path(),
            extension: default_extension(),
        }
    }

    /// Set the download directory
    pub fn download_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_path = path.into();
        self
    }

    /// Restrict remote resolution to the given top-level names
    pub fn allowed_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_modules = Some(modules.into_iter().map(Into::into).collect());
        self
    }

    /// Whether to append the download directory to the local search list
    pub fn update_search_path(mut self, update: bool) -> Self {
        self.update_search_path = update;
        self
    }

    /// Set the source file extension
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ResolverConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// A relative `download_path` is taken relative to the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        if config.download_path.is_relative() {
            if let Some(dir) = path.parent() {
                config.download_path = dir.join(&config.download_path);
            }
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search_paths.is_empty() {
            return Err(ConfigError::NoSearchPaths);
        }

        for path in &self.search_paths {
            let parsed = url::Url::parse(path).map_err(|e| ConfigError::InvalidSearchPath {
                path: path.clone(),
                reason: e.to_string(),
            })?;

            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(ConfigError::InvalidSearchPath {
                    path: path.clone(),
                    reason: format!("unsupported scheme '{}'", parsed.scheme()),
                });
            }
        }

        if self.extension.is_empty() || self.extension.contains('.') {
            return Err(ConfigError::InvalidExtension(self.extension.clone()));
        }

        if let Some(modules) = &self.allowed_modules {
            for module in modules {
                crate::name::ModuleName::parse_top_level(module)?;
            }
        }

        Ok(())
    }

    /// Base URLs, each ending with exactly one `/`
    pub fn normalized_search_paths(&self) -> Vec<String> {
        self.search_paths
            .iter()
            .map(|path| format!("{}/", path.trim_end_matches('/')))
            .collect()
    }

    /// Serialize to a TOML string
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Find the nearest `urlimport.toml`, starting at `start_dir` and walking up
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }

        current = current.parent()?;
    }
}
