use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::semantic::DEFAULT_MODEL;
use crate::store::{RebuildStrategy, StoreOptions};

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Environment variable overriding the base directory
pub const BASE_PATH_ENV: &str = "JOBMATCH_BASE_PATH";

const DEFAULT_HASH_DIMENSIONS: usize = 384;
const DEFAULT_K: usize = 10;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Embedding model name, or "hash" for the built-in hashing encoder
    #[serde(default = "default_model")]
    pub model: String,

    /// Vector size of the hashing encoder
    #[serde(default = "default_hash_dimensions")]
    pub hash_dimensions: usize,

    /// How the index is rebuilt after a removal
    #[serde(default)]
    pub rebuild: RebuildStrategy,

    /// Persist both stores after every add and remove
    #[serde(default = "default_true")]
    pub autosave: bool,

    /// Worker count for batch matching: "auto" or a positive integer
    #[serde(default = "default_batch_parallelism")]
    pub batch_parallelism: String,

    /// Number of matches returned when a request does not say
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Daemon listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            hash_dimensions: DEFAULT_HASH_DIMENSIONS,
            rebuild: RebuildStrategy::default(),
            autosave: true,
            batch_parallelism: default_batch_parallelism(),
            default_k: DEFAULT_K,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            listen: default_listen(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_hash_dimensions() -> usize {
    DEFAULT_HASH_DIMENSIONS
}

fn default_true() -> bool {
    true
}

fn default_batch_parallelism() -> String {
    "auto".to_string()
}

fn default_k() -> usize {
    DEFAULT_K
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

/// Base directory: `$JOBMATCH_BASE_PATH` or `~/.local/share/jobmatch`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var(BASE_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("Could not determine home directory")?
        .context("Home directory path is empty")?;
    Ok(home.join(".local/share/jobmatch"))
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        // "auto" or positive integer
        if self.batch_parallelism != "auto" {
            match self.batch_parallelism.parse::<usize>() {
                Ok(0) | Err(_) => bail!(
                    "batch_parallelism must be 'auto' or a positive integer, got '{}'",
                    self.batch_parallelism
                ),
                Ok(_) => {}
            }
        }

        if self.default_k == 0 {
            bail!("default_k must be greater than 0");
        }

        if self.hash_dimensions == 0 {
            bail!("hash_dimensions must be greater than 0");
        }
        // The vector file header stores dimensions as u16
        if self.hash_dimensions > u16::MAX as usize {
            bail!(
                "hash_dimensions must be at most {}, got {}",
                u16::MAX,
                self.hash_dimensions
            );
        }

        if self.download_timeout_secs == 0 {
            bail!("download_timeout_secs must be greater than 0");
        }

        if self.model.trim().is_empty() {
            bail!("model must not be empty");
        }

        Ok(())
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(&base_path()?)
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let config_path = base_path.join(CONFIG_FILE_NAME);

        // create new if does not exist
        if !config_path.exists() {
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("Failed to create {}", base_path.display()))?;
            std::fs::write(&config_path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(self.base_path.join(CONFIG_FILE_NAME), config_str)
            .context("Failed to save config")?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Override the base directory of an in-memory config.
    pub fn with_base_path(mut self, base_path: &Path) -> Self {
        self.base_path = base_path.to_path_buf();
        self
    }

    /// Resolved batch worker count.
    pub fn parallelism(&self) -> usize {
        self.batch_parallelism
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            rebuild: self.rebuild,
            autosave: self.autosave,
        }
    }
}
