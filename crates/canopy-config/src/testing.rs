//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary store root
//! - A project directory with its own `.canopy/config.toml`
//!
//! # Usage
//!
//! ```ignore
//! use canopy_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new().unwrap();
//! let config = env.config();
//! // config.store.root points into the temp dir
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Isolated node store root
    pub store_root: PathBuf,
    /// Project root for the test
    pub project_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let project_root = root.join("project");
        let store_root = root.join("store");

        std::fs::create_dir_all(project_root.join(".canopy"))?;
        std::fs::create_dir_all(&store_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            store_root,
            project_root,
            test_id,
        })
    }

    /// Project config file path
    pub fn config_path(&self) -> PathBuf {
        self.project_root.join(".canopy").join("config.toml")
    }

    /// Config pointing at this environment's store.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.store.root = self.store_root.clone();
        cfg
    }

    /// Write `config` to the project config file.
    pub fn write_config(&self, config: &Config) -> anyhow::Result<PathBuf> {
        let path = self.config_path();
        std::fs::write(&path, toml::to_string_pretty(config)?)?;
        Ok(path)
    }

    /// A fresh, empty store root inside this environment.
    pub fn scratch_store(&self, name: &str) -> anyhow::Result<PathBuf> {
        let path = self.store_root.with_file_name(format!("store-{}", name));
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
