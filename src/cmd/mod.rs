//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                                     |
//! |-------------|------------------------------------------------------|
//! | `project`   | `Init`                                               |
//! | `config`    | `Config`                                             |
//! | `board`     | `Board`, `Stage`                                     |
//! | `card`      | `Card`                                               |
//! | `criteria`  | `Criteria`, `Activity`                               |

pub mod board;
pub mod card;
pub mod config;
pub mod criteria;
pub mod project;

pub use board::{cmd_board, cmd_stage};
pub use card::cmd_card;
pub use config::cmd_config;
pub use criteria::{cmd_activity, cmd_criteria};
pub use project::cmd_init;

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use kanban::config::KanbanConfig;
use kanban::init::is_initialized;
use kanban::workflow::{Card, CardService, DbHandle, KanbanDb, SystemClock};

/// Everything a command needs once the project is known to exist.
pub struct Session {
    pub config: KanbanConfig,
    pub db: DbHandle,
    pub service: CardService,
    pub user: String,
    pub json: bool,
}

impl Session {
    pub fn open(config: KanbanConfig, user: Option<String>, json: bool) -> Result<Self> {
        if !is_initialized(&config.project_dir) {
            anyhow::bail!(
                "No kanban project at {}. Run 'kanban init' first.",
                config.project_dir.display()
            );
        }
        let db_path = config.db_path();
        let db = DbHandle::new(
            KanbanDb::new(&db_path)
                .with_context(|| format!("Failed to open database {}", db_path.display()))?,
        );
        let service = CardService::sqlite(db.clone(), Arc::new(SystemClock), config.cache_enabled());
        let user = user
            .or_else(|| std::env::var("USER").ok())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "anonymous".to_string());
        Ok(Self {
            config,
            db,
            service,
            user,
            json,
        })
    }

    /// Prints `value` as JSON with `--json`, otherwise runs `human`.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            let text =
                serde_json::to_string_pretty(value).context("Failed to serialize output")?;
            println!("{}", text);
        } else {
            human(value);
        }
        Ok(())
    }
}

pub fn card_line(card: &Card) -> String {
    let code = card.code.as_deref().unwrap_or("-");
    let deadline = card
        .deadline
        .map(|d| format!("  due {}", d.format("%Y-%m-%d")))
        .unwrap_or_default();
    format!("{:<12} {}{}  ({})", code, card.title, deadline, card.id)
}
