//! Project configuration read from `.kanban/kanban.toml`.
//!
//! Settings are layered file → environment → CLI:
//!
//! ```toml
//! [storage]
//! db_path = ".kanban/kanban.db"
//!
//! [cache]
//! enabled = true
//!
//! [logging]
//! level = "info"
//! json = false
//!
//! [codes]
//! default_prefix = "KB-"
//! ```
//!
//! `KANBAN_DB` overrides `storage.db_path` and `KANBAN_LOG` overrides the
//! log filter.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const KANBAN_DIR: &str = ".kanban";
pub const CONFIG_FILE: &str = "kanban.toml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file, relative to the project directory unless absolute
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    format!("{}/kanban.db", KANBAN_DIR)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `KANBAN_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodesConfig {
    /// Prefix for boards created without an explicit one
    #[serde(default = "default_prefix")]
    pub default_prefix: String,
}

fn default_prefix() -> String {
    "KB-".to_string()
}

impl Default for CodesConfig {
    fn default() -> Self {
        Self {
            default_prefix: default_prefix(),
        }
    }
}

/// The complete kanban.toml structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KanbanToml {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub codes: CodesConfig,
}

impl KanbanToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse kanban.toml")
    }

    /// Load `kanban.toml` from `kanban_dir`, or defaults if there is none.
    pub fn load_or_default(kanban_dir: &Path) -> Result<Self> {
        let config_path = kanban_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize kanban.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Database path, with `KANBAN_DB` taking precedence over the file.
    pub fn db_path(&self) -> String {
        std::env::var("KANBAN_DB")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.storage.db_path.clone())
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.storage.db_path.trim().is_empty() {
            warnings.push("storage.db_path is empty".to_string());
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            warnings.push(format!(
                "Unknown logging.level '{}': expected one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }
        if self.codes.default_prefix.is_empty() {
            warnings.push("codes.default_prefix is empty; card codes will start with the date".to_string());
        }

        warnings
    }
}

/// Resolved settings for one CLI invocation.
#[derive(Debug, Clone)]
pub struct KanbanConfig {
    pub project_dir: PathBuf,
    pub kanban_dir: PathBuf,
    pub toml: KanbanToml,
    /// CLI override: verbose logging
    pub verbose: bool,
}

impl KanbanConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let kanban_dir = project_dir.join(KANBAN_DIR);
        let toml = KanbanToml::load_or_default(&kanban_dir)?;
        Ok(Self {
            project_dir,
            kanban_dir,
            toml,
            verbose: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.kanban_dir.join(CONFIG_FILE)
    }

    /// Database file (env → file → default), resolved against the project.
    pub fn db_path(&self) -> PathBuf {
        let path = PathBuf::from(self.toml.db_path());
        if path.is_absolute() {
            path
        } else {
            self.project_dir.join(path)
        }
    }

    /// Log filter (env → `--verbose` → file).
    pub fn log_filter(&self) -> String {
        if let Ok(filter) = std::env::var("KANBAN_LOG")
            && !filter.is_empty()
        {
            return filter;
        }
        if self.verbose {
            "debug".to_string()
        } else {
            self.toml.logging.level.clone()
        }
    }

    pub fn cache_enabled(&self) -> bool {
        self.toml.cache.enabled
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
