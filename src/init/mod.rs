//! `kanban init`: creates the project's `.kanban/` directory.
//!
//! ```text
//! .kanban/
//! ├── kanban.toml      # Configuration (see `config`)
//! └── kanban.db        # SQLite store, unless storage.db_path points elsewhere
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_FILE, KANBAN_DIR, KanbanConfig, KanbanToml};
use crate::workflow::db::KanbanDb;

/// Result of initializing a kanban project.
#[derive(Debug)]
pub struct InitResult {
    pub kanban_dir: PathBuf,
    pub db_path: PathBuf,
    /// False when `.kanban/` already existed
    pub created: bool,
}

/// Creates `.kanban/`, a default `kanban.toml` and the database. Safe to
/// run again: existing files are kept and missing ones are filled in.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let kanban_dir = get_kanban_dir(project_dir);
    let created = !kanban_dir.exists();
    std::fs::create_dir_all(&kanban_dir)
        .with_context(|| format!("Failed to create {}", kanban_dir.display()))?;

    let config_path = kanban_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        KanbanToml::default().save(&config_path)?;
    }

    let config = KanbanConfig::new(project_dir.to_path_buf())?;
    let db_path = open_database(&config)?;

    Ok(InitResult {
        kanban_dir: config.kanban_dir,
        db_path,
        created,
    })
}

/// Opens the configured database once so its schema exists, creating
/// parent directories as needed.
pub fn open_database(config: &KanbanConfig) -> Result<PathBuf> {
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    KanbanDb::new(&db_path)?;
    Ok(db_path)
}

pub fn is_initialized(project_dir: &Path) -> bool {
    get_kanban_dir(project_dir).exists()
}

pub fn get_kanban_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(KANBAN_DIR)
}
