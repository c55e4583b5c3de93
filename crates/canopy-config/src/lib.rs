//! # canopy-config
//!
//! Configuration management for Canopy.
//!
//! Loads configuration from:
//! 1. `~/.canopy/config.toml` (global)
//! 2. `.canopy/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub use logging::{init_logging, LogLevel};

/// Global config instance, loaded on first use
static CONFIG: Lazy<Config> = Lazy::new(|| Config::load().unwrap_or_default());

/// Get global config (read-only)
pub fn config() -> &'static Config {
    &CONFIG
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::load_from(&global_path)?;
            }
        }

        let project_path = Path::new(".canopy/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let overlay = ConfigOverlay::load_from(project_path)?;
            config.merge(overlay);
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a single config file (no layering, no env overrides).
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.canopy/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".canopy/config.toml"))
    }

    /// Merge a project overlay over this one. Only fields the overlay sets
    /// are replaced, so a project can restore a default the global file
    /// changed.
    pub fn merge(&mut self, overlay: ConfigOverlay) {
        let ConfigOverlay {
            store,
            cache,
            logging,
        } = overlay;

        if let Some(root) = store.root {
            self.store.root = root;
        }
        if let Some(verify) = store.verify_on_read {
            self.store.verify_on_read = verify;
        }
        if let Some(threads) = store.write_threads {
            self.store.write_threads = Some(threads);
        }
        if let Some(enabled) = cache.enabled {
            self.cache.enabled = enabled;
        }
        if let Some(max_nodes) = cache.max_nodes {
            self.cache.max_nodes = max_nodes;
        }
        if let Some(level) = logging.level {
            self.logging.level = level;
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("CANOPY_STORE_ROOT") {
            self.store.root = PathBuf::from(root);
        }
        if let Ok(max) = std::env::var("CANOPY_CACHE_MAX_NODES") {
            if let Ok(n) = max.parse() {
                self.cache.max_nodes = n;
            }
        }
        if let Ok(level) = std::env::var("CANOPY_LOG") {
            if let Some(level) = LogLevel::parse(&level) {
                self.logging.level = level;
            }
        }
    }

    /// Store root with `~` expanded.
    pub fn store_root(&self) -> PathBuf {
        path::expand_tilde(&self.store.root)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Node store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the on-disk node store
    pub root: PathBuf,
    /// Re-hash every fetched node and reject mismatches
    pub verify_on_read: bool,
    /// Threads for batch writes (None = auto)
    pub write_threads: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.canopy/store"),
            verify_on_read: true,
            write_threads: None,
        }
    }
}

/// Decoded-node cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Decoded nodes kept before older ones are evicted
    pub max_nodes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_nodes: 65536,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
        }
    }
}

/// Project-level config: every field optional, applied with
/// [`Config::merge`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverlay {
    pub store: StoreOverlay,
    pub cache: CacheOverlay,
    pub logging: LoggingOverlay,
}

impl ConfigOverlay {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOverlay {
    pub root: Option<PathBuf>,
    pub verify_on_read: Option<bool>,
    pub write_threads: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOverlay {
    pub enabled: Option<bool>,
    pub max_nodes: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOverlay {
    pub level: Option<LogLevel>,
}
