//! Configuration management for sitemapper
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sitemap generation settings
    #[serde(default)]
    pub generate: GenerateConfig,

    /// Memory budget estimation
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Output location
    #[serde(default)]
    pub output: OutputConfig,

    /// Per link type inclusion defaults, keyed by link type
    #[serde(default)]
    pub link_types: BTreeMap<String, LinkTypeSettings>,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Sitemap generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// Maximum links per sitemap chunk file
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Resources synchronized per rebuild step
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Absolute base URL prefixed to every location
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// chrono format string for lastmod values
    #[serde(default = "default_lastmod_format")]
    pub lastmod_format: String,

    /// Load whole alias tables per language instead of one lookup per link
    #[serde(default = "default_prefetch_aliases")]
    pub prefetch_aliases: bool,

    /// Substitute URL aliases for internal paths
    #[serde(default = "default_resolve_aliases")]
    pub resolve_aliases: bool,

    /// Language used when neither the link nor the sitemap has one
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Elements written between writer flushes
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,

    /// Also write a gzip copy of every finished file
    #[serde(default = "default_gzip")]
    pub gzip: bool,

    /// Optional XSL stylesheet referenced from generated files
    #[serde(default)]
    pub xsl_url: Option<String>,

    /// Minimum seconds between automatic regenerations
    #[serde(default = "default_minimum_lifetime")]
    pub minimum_lifetime: i64,
}

/// Memory governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Fixed base memory in bytes
    #[serde(default = "default_memory_floor")]
    pub floor_bytes: u64,

    /// Estimated bytes held per link in a chunk
    #[serde(default = "default_per_link_bytes")]
    pub per_link_bytes: u64,

    /// Estimated bytes held per prefetched alias
    #[serde(default = "default_per_alias_bytes")]
    pub per_alias_bytes: u64,
}

/// Output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for generated files (defaults to `<base_dir>/sitemaps`)
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Inclusion defaults for one link type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkTypeSettings {
    /// Whether links of this type are included by default
    #[serde(default = "default_link_type_status")]
    pub status: bool,

    /// Default priority (0.0 - 1.0)
    #[serde(default = "default_link_type_priority")]
    pub priority: f64,

    /// Only include resources that have a public alias
    #[serde(default = "default_require_alias")]
    pub require_alias: bool,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for sitemapper data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Directory receiving generated sitemap files
    pub output_dir: PathBuf,

    /// Persisted batch sandbox between steps
    pub checkpoint_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            generate: GenerateConfig::default(),
            memory: MemoryConfig::default(),
            output: OutputConfig::default(),
            link_types: BTreeMap::new(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            batch_limit: default_batch_limit(),
            base_url: default_base_url(),
            lastmod_format: default_lastmod_format(),
            prefetch_aliases: default_prefetch_aliases(),
            resolve_aliases: default_resolve_aliases(),
            default_language: default_language(),
            flush_every: default_flush_every(),
            gzip: default_gzip(),
            xsl_url: None,
            minimum_lifetime: default_minimum_lifetime(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            floor_bytes: default_memory_floor(),
            per_link_bytes: default_per_link_bytes(),
            per_alias_bytes: default_per_alias_bytes(),
        }
    }
}

impl Default for LinkTypeSettings {
    fn default() -> Self {
        Self {
            status: default_link_type_status(),
            priority: default_link_type_priority(),
            require_alias: default_require_alias(),
        }
    }
}

impl Config {
    /// Get the default base directory for sitemapper (~/.sitemapper)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sitemapper")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    fn paths_for(base: PathBuf, config_file: PathBuf, output: &OutputConfig) -> PathsConfig {
        let output_dir = match &output.directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base.join("sitemaps"),
        };
        PathsConfig {
            config_file,
            db_file: base.join("links.db"),
            checkpoint_file: base.join("batch.json"),
            output_dir,
            base_dir: base,
        }
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        let config_file = base.join("config.toml");
        self.paths = Self::paths_for(base, config_file, &self.output);
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Set up paths based on config file location
        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = Self::paths_for(base, config_path.to_path_buf(), &config.output);

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            let path = config.paths.config_file.clone();
            config = Self::load(&path)?;
        } else {
            debug!("No config file found, using defaults");
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if sitemapper is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Inclusion defaults for a link type, falling back to the built-in defaults
    pub fn link_type(&self, link_type: &str) -> LinkTypeSettings {
        self.link_types.get(link_type).cloned().unwrap_or_default()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.generate.chunk_size == 0 {
            return Err(Error::Config(
                "generate.chunk_size must be positive".to_string(),
            ));
        }

        if self.generate.batch_limit == 0 {
            return Err(Error::Config(
                "generate.batch_limit must be positive".to_string(),
            ));
        }

        if self.generate.flush_every == 0 {
            return Err(Error::Config(
                "generate.flush_every must be positive".to_string(),
            ));
        }

        if self.generate.lastmod_format.trim().is_empty() {
            return Err(Error::Config(
                "generate.lastmod_format must not be empty".to_string(),
            ));
        }

        if self.generate.minimum_lifetime < 0 {
            return Err(Error::Config(
                "generate.minimum_lifetime must not be negative".to_string(),
            ));
        }

        let base = Url::parse(&self.generate.base_url)?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "generate.base_url is not an absolute base URL: {}",
                self.generate.base_url
            )));
        }

        for (name, settings) in &self.link_types {
            if !(0.0..=1.0).contains(&settings.priority) {
                return Err(Error::Config(format!(
                    "link_types.{}.priority must be between 0.0 and 1.0",
                    name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.generate.chunk_size, 1000);
        assert_eq!(config.generate.flush_every, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.generate.chunk_size = 250;
        config
            .link_types
            .insert("node".to_string(), LinkTypeSettings::default());

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.generate.chunk_size, 250);
        assert!(loaded.link_types.contains_key("node"));
        assert_eq!(loaded.paths.db_file, tmp.path().join("links.db"));
        assert_eq!(loaded.paths.output_dir, tmp.path().join("sitemaps"));
    }

    #[test]
    fn test_relative_output_directory() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.output.directory = Some(PathBuf::from("public"));
        config.init_paths(Some(tmp.path().to_path_buf()));
        assert_eq!(config.paths.output_dir, tmp.path().join("public"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.generate.chunk_size = 0;
        assert!(config.validate().is_err());
        config.generate.chunk_size = 10;
        assert!(config.validate().is_ok());

        config.generate.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
        config.generate.base_url = "https://example.com".to_string();

        config.link_types.insert(
            "node".to_string(),
            LinkTypeSettings {
                priority: 1.5,
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [generate]
            chunk_size = 2

            [link_types.node]
            priority = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.generate.chunk_size, 2);
        assert_eq!(config.generate.batch_limit, 100);
        let node = config.link_type("node");
        assert!(node.status);
        assert!((node.priority - 0.8).abs() < f64::EPSILON);
        assert!((config.link_type("user").priority - 0.5).abs() < f64::EPSILON);
    }
}
