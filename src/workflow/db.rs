use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::json;
use uuid::Uuid;

use super::acceptance::CriteriaStore;
use super::code::period_token;
use super::models::*;
use super::ports::{ActivityRecorder, BoardStore, CardStore, StageStore};

/// Async-safe handle to the kanban database.
///
/// Wraps `KanbanDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<KanbanDb>>,
}

impl DbHandle {
    pub fn new(db: KanbanDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&KanbanDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Used for setup in the CLI
    /// and in tests; never call this from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, KanbanDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct KanbanDb {
    conn: Connection,
}

const CARD_COLUMNS: &str = "id, board_id, code, title, content, stage_id, parent_id, sort_number, deadline, author, created_at, modified_at";
const STAGE_COLUMNS: &str = "id, board_id, title, status, wip_limit, sort_number";
const CRITERION_COLUMNS: &str =
    "id, card_id, summary, finished, status, sort_number, author, created_at";

impl KanbanDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS boards (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    code_prefix TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS stages (
                    id TEXT PRIMARY KEY,
                    board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'todo',
                    wip_limit INTEGER,
                    sort_number INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS cards (
                    id TEXT PRIMARY KEY,
                    board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
                    code TEXT,
                    period TEXT NOT NULL,
                    title TEXT NOT NULL,
                    content TEXT,
                    stage_id TEXT NOT NULL REFERENCES stages(id),
                    parent_id TEXT,
                    sort_number INTEGER NOT NULL DEFAULT 0,
                    deadline TEXT,
                    author TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    modified_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS acceptance_criteria (
                    id TEXT PRIMARY KEY,
                    card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                    summary TEXT NOT NULL,
                    finished INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'unverified',
                    sort_number INTEGER NOT NULL DEFAULT 0,
                    author TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS activities (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    card_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    summary TEXT NOT NULL,
                    detail TEXT NOT NULL DEFAULT '{}',
                    actor TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_stages_board ON stages(board_id);
                CREATE INDEX IF NOT EXISTS idx_cards_stage ON cards(stage_id);
                CREATE INDEX IF NOT EXISTS idx_cards_parent ON cards(parent_id);
                CREATE INDEX IF NOT EXISTS idx_cards_board_period ON cards(board_id, period);
                CREATE INDEX IF NOT EXISTS idx_criteria_card ON acceptance_criteria(card_id);
                CREATE INDEX IF NOT EXISTS idx_activities_card ON activities(card_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Boards ────────────────────────────────────────────────────────

    pub fn create_board(&self, name: &str, code_prefix: &str) -> Result<Board> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO boards (id, name, code_prefix) VALUES (?1, ?2, ?3)",
                params![id, name, code_prefix],
            )
            .context("Failed to insert board")?;
        self.get_board(&id)?.context("Board not found after insert")
    }

    pub fn get_board(&self, id: &str) -> Result<Option<Board>> {
        self.conn
            .query_row(
                "SELECT id, name, code_prefix, created_at FROM boards WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Board {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        code_prefix: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to query board")
    }

    pub fn list_boards(&self) -> Result<Vec<Board>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, code_prefix, created_at FROM boards ORDER BY created_at, name")
            .context("Failed to prepare list_boards")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Board {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    code_prefix: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .context("Failed to query boards")?;
        let mut boards = Vec::new();
        for row in rows {
            boards.push(row.context("Failed to read board row")?);
        }
        Ok(boards)
    }

    // ── Stages ────────────────────────────────────────────────────────

    pub fn create_stage(
        &self,
        board_id: &str,
        title: &str,
        status: StageStatus,
        wip_limit: Option<u32>,
    ) -> Result<Stage> {
        let max_sort: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(sort_number), -1) FROM stages WHERE board_id = ?1",
                params![board_id],
                |row| row.get(0),
            )
            .context("Failed to get max stage sort number")?;

        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO stages (id, board_id, title, status, wip_limit, sort_number) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, board_id, title, status.as_str(), wip_limit, max_sort + 1],
            )
            .context("Failed to insert stage")?;
        self.get_stage(&id)?.context("Stage not found after insert")
    }

    pub fn get_stage(&self, id: &str) -> Result<Option<Stage>> {
        let sql = format!("SELECT {STAGE_COLUMNS} FROM stages WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], stage_row)
            .optional()
            .context("Failed to query stage")?;
        row.map(StageRow::into_stage).transpose()
    }

    pub fn list_stages(&self, board_id: &str) -> Result<Vec<Stage>> {
        let sql =
            format!("SELECT {STAGE_COLUMNS} FROM stages WHERE board_id = ?1 ORDER BY sort_number");
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_stages")?;
        let rows = stmt
            .query_map(params![board_id], stage_row)
            .context("Failed to query stages")?;
        let mut stages = Vec::new();
        for row in rows {
            stages.push(row.context("Failed to read stage row")?.into_stage()?);
        }
        Ok(stages)
    }

    pub fn count_cards_in_stage(&self, stage_id: &str) -> Result<u32> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM cards WHERE stage_id = ?1 AND deleted = 0",
                params![stage_id],
                |row| row.get(0),
            )
            .context("Failed to count cards in stage")
    }

    // ── Cards ─────────────────────────────────────────────────────────

    /// An empty `record.code` is stored as NULL.
    pub fn insert_card(&self, author: &str, record: &CardRecord) -> Result<String> {
        let sort_number = match record.sort_number {
            Some(n) => n,
            None => self.next_card_sort_number(&record.stage_id)?,
        };
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO cards (id, board_id, code, period, title, content, stage_id, parent_id, sort_number, deadline, author)
                 VALUES (?1, ?2, NULLIF(?3, ''), ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id,
                    record.board_id,
                    record.code,
                    record.period,
                    record.title,
                    record.content,
                    record.stage_id,
                    record.parent_id,
                    sort_number,
                    record.deadline.map(|d| d.to_rfc3339()),
                    author,
                ],
            )
            .context("Failed to insert card")?;
        Ok(id)
    }

    fn next_card_sort_number(&self, stage_id: &str) -> Result<i64> {
        let max_sort: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(sort_number), -1) FROM cards WHERE stage_id = ?1 AND deleted = 0",
                params![stage_id],
                |row| row.get(0),
            )
            .context("Failed to get max card sort number")?;
        Ok(max_sort + 1)
    }

    /// Insert a card that bypasses the workflow, as a data import would.
    /// The card gets no code.
    pub fn import_card(
        &self,
        board_id: &str,
        stage_id: &str,
        title: &str,
        parent_id: Option<&str>,
    ) -> Result<Card> {
        let record = CardRecord {
            board_id: board_id.to_string(),
            code: String::new(),
            period: period_token(Utc::now()),
            title: title.to_string(),
            content: None,
            stage_id: stage_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            sort_number: None,
            deadline: None,
        };
        let id = self.insert_card("import", &record)?;
        self.get_card(&id)?.context("Card not found after import")
    }

    /// Like `import_card`, but counted under an explicit code period.
    pub fn import_card_in_period(
        &self,
        board_id: &str,
        stage_id: &str,
        title: &str,
        period: &str,
    ) -> Result<Card> {
        let card = self.import_card(board_id, stage_id, title, None)?;
        self.conn
            .execute(
                "UPDATE cards SET period = ?1 WHERE id = ?2",
                params![period, card.id],
            )
            .context("Failed to set imported card period")?;
        Ok(card)
    }

    pub fn get_card(&self, id: &str) -> Result<Option<Card>> {
        let sql = format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?1 AND deleted = 0");
        let row = self
            .conn
            .query_row(&sql, params![id], card_row)
            .optional()
            .context("Failed to query card")?;
        row.map(CardRow::into_card).transpose()
    }

    pub fn list_cards_by_stage(&self, stage_id: &str) -> Result<Vec<Card>> {
        let sql = format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE stage_id = ?1 AND deleted = 0 ORDER BY sort_number, created_at"
        );
        self.query_cards(&sql, stage_id)
    }

    pub fn list_child_cards(&self, parent_id: &str) -> Result<Vec<Card>> {
        let sql = format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE parent_id = ?1 AND deleted = 0 ORDER BY sort_number, created_at"
        );
        self.query_cards(&sql, parent_id)
    }

    fn query_cards(&self, sql: &str, key: &str) -> Result<Vec<Card>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare card query")?;
        let rows = stmt
            .query_map(params![key], card_row)
            .context("Failed to query cards")?;
        let mut cards = Vec::new();
        for row in rows {
            cards.push(row.context("Failed to read card row")?.into_card()?);
        }
        Ok(cards)
    }

    pub fn update_card(&self, id: &str, changes: &CardChanges) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE cards SET code = ?1, title = ?2, content = ?3, stage_id = ?4, parent_id = ?5,
                     sort_number = ?6, deadline = ?7, modified_at = datetime('now')
                 WHERE id = ?8 AND deleted = 0",
                params![
                    changes.code,
                    changes.title,
                    changes.content,
                    changes.stage_id,
                    changes.parent_id,
                    changes.sort_number,
                    changes.deadline.map(|d| d.to_rfc3339()),
                    id,
                ],
            )
            .context("Failed to update card")
    }

    pub fn move_card(&self, id: &str, stage_id: &str, sort_number: i64) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE cards SET stage_id = ?1, sort_number = ?2, modified_at = datetime('now')
                 WHERE id = ?3 AND deleted = 0",
                params![stage_id, sort_number, id],
            )
            .context("Failed to move card")
    }

    /// Soft delete: the row stays so period totals keep counting it.
    pub fn delete_card(&self, id: &str) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE cards SET deleted = 1, modified_at = datetime('now') WHERE id = ?1 AND deleted = 0",
                params![id],
            )
            .context("Failed to delete card")
    }

    pub fn has_child(&self, id: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM cards WHERE parent_id = ?1 AND deleted = 0",
                params![id],
                |row| row.get(0),
            )
            .context("Failed to check child cards")
    }

    pub fn total_cards_created(&self, board_id: &str, period: &str) -> Result<u32> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM cards WHERE board_id = ?1 AND period = ?2",
                params![board_id, period],
                |row| row.get(0),
            )
            .context("Failed to count cards created in period")
    }

    // ── Acceptance criteria ───────────────────────────────────────────

    pub fn add_criterion(
        &self,
        author: &str,
        card_id: &str,
        summary: &str,
    ) -> Result<AcceptanceCriterion> {
        let max_sort: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(sort_number), -1) FROM acceptance_criteria WHERE card_id = ?1",
                params![card_id],
                |row| row.get(0),
            )
            .context("Failed to get max criterion sort number")?;
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO acceptance_criteria (id, card_id, summary, sort_number, author) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, card_id, summary, max_sort + 1, author],
            )
            .context("Failed to insert acceptance criterion")?;
        self.get_criterion(&id)?
            .context("Acceptance criterion not found after insert")
    }

    pub fn get_criterion(&self, id: &str) -> Result<Option<AcceptanceCriterion>> {
        let sql = format!("SELECT {CRITERION_COLUMNS} FROM acceptance_criteria WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], criterion_row)
            .optional()
            .context("Failed to query acceptance criterion")?;
        row.map(CriterionRow::into_criterion).transpose()
    }

    pub fn list_criteria(&self, card_id: &str) -> Result<Vec<AcceptanceCriterion>> {
        let sql = format!(
            "SELECT {CRITERION_COLUMNS} FROM acceptance_criteria WHERE card_id = ?1 ORDER BY sort_number"
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_criteria")?;
        let rows = stmt
            .query_map(params![card_id], criterion_row)
            .context("Failed to query acceptance criteria")?;
        let mut criteria = Vec::new();
        for row in rows {
            criteria.push(
                row.context("Failed to read acceptance criterion row")?
                    .into_criterion()?,
            );
        }
        Ok(criteria)
    }

    pub fn update_criterion(
        &self,
        id: &str,
        finished: bool,
        status: CriterionStatus,
    ) -> Result<Option<AcceptanceCriterion>> {
        self.conn
            .execute(
                "UPDATE acceptance_criteria SET finished = ?1, status = ?2 WHERE id = ?3",
                params![finished, status.as_str(), id],
            )
            .context("Failed to update acceptance criterion")?;
        self.get_criterion(id)
    }

    // ── Activities ────────────────────────────────────────────────────

    pub fn insert_activity(
        &self,
        card_id: &str,
        kind: ActivityKind,
        summary: &str,
        detail: &serde_json::Value,
        actor: &str,
    ) -> Result<i64> {
        let detail = serde_json::to_string(detail).context("Failed to serialize activity detail")?;
        self.conn
            .execute(
                "INSERT INTO activities (card_id, kind, summary, detail, actor) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![card_id, kind.as_str(), summary, detail, actor],
            )
            .context("Failed to insert activity")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_activities(&self, card_id: &str) -> Result<Vec<Activity>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, card_id, kind, summary, detail, actor, created_at
                 FROM activities WHERE card_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_activities")?;
        let rows = stmt
            .query_map(params![card_id], |row| {
                Ok(ActivityRow {
                    id: row.get(0)?,
                    card_id: row.get(1)?,
                    kind: row.get(2)?,
                    summary: row.get(3)?,
                    detail: row.get(4)?,
                    actor: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .context("Failed to query activities")?;
        let mut activities = Vec::new();
        for row in rows {
            activities.push(row.context("Failed to read activity row")?.into_activity()?);
        }
        Ok(activities)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────

/// Intermediate row struct for cards; converted with `into_card`.
struct CardRow {
    id: String,
    board_id: String,
    code: Option<String>,
    title: String,
    content: Option<String>,
    stage_id: String,
    parent_id: Option<String>,
    sort_number: i64,
    deadline: Option<String>,
    author: String,
    created_at: String,
    modified_at: String,
}

fn card_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CardRow> {
    Ok(CardRow {
        id: row.get(0)?,
        board_id: row.get(1)?,
        code: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        stage_id: row.get(5)?,
        parent_id: row.get(6)?,
        sort_number: row.get(7)?,
        deadline: row.get(8)?,
        author: row.get(9)?,
        created_at: row.get(10)?,
        modified_at: row.get(11)?,
    })
}

impl CardRow {
    fn into_card(self) -> Result<Card> {
        let deadline = self
            .deadline
            .as_deref()
            .map(|d| {
                DateTime::parse_from_rfc3339(d)
                    .map(|d| d.with_timezone(&Utc))
                    .context("Failed to parse card deadline")
            })
            .transpose()?;
        Ok(Card {
            id: self.id,
            board_id: self.board_id,
            code: self.code,
            title: self.title,
            content: self.content,
            stage_id: self.stage_id,
            parent_id: self.parent_id,
            sort_number: self.sort_number,
            deadline,
            author: self.author,
            created_at: self.created_at,
            modified_at: self.modified_at,
        })
    }
}

struct StageRow {
    id: String,
    board_id: String,
    title: String,
    status: String,
    wip_limit: Option<u32>,
    sort_number: i64,
}

fn stage_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StageRow> {
    Ok(StageRow {
        id: row.get(0)?,
        board_id: row.get(1)?,
        title: row.get(2)?,
        status: row.get(3)?,
        wip_limit: row.get(4)?,
        sort_number: row.get(5)?,
    })
}

impl StageRow {
    fn into_stage(self) -> Result<Stage> {
        let status = StageStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse stage status")?;
        Ok(Stage {
            id: self.id,
            board_id: self.board_id,
            title: self.title,
            status,
            wip_limit: self.wip_limit,
            sort_number: self.sort_number,
        })
    }
}

struct CriterionRow {
    id: String,
    card_id: String,
    summary: String,
    finished: bool,
    status: String,
    sort_number: i64,
    author: String,
    created_at: String,
}

fn criterion_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CriterionRow> {
    Ok(CriterionRow {
        id: row.get(0)?,
        card_id: row.get(1)?,
        summary: row.get(2)?,
        finished: row.get(3)?,
        status: row.get(4)?,
        sort_number: row.get(5)?,
        author: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl CriterionRow {
    fn into_criterion(self) -> Result<AcceptanceCriterion> {
        let status = CriterionStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse acceptance criterion status")?;
        Ok(AcceptanceCriterion {
            id: self.id,
            card_id: self.card_id,
            summary: self.summary,
            finished: self.finished,
            status,
            sort_number: self.sort_number,
            author: self.author,
            created_at: self.created_at,
        })
    }
}

struct ActivityRow {
    id: i64,
    card_id: String,
    kind: String,
    summary: String,
    detail: String,
    actor: String,
    created_at: String,
}

impl ActivityRow {
    fn into_activity(self) -> Result<Activity> {
        let kind = ActivityKind::from_str(&self.kind)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse activity kind")?;
        let detail =
            serde_json::from_str(&self.detail).context("Failed to parse activity detail JSON")?;
        Ok(Activity {
            id: self.id,
            card_id: self.card_id,
            kind,
            summary: self.summary,
            detail,
            actor: self.actor,
            created_at: self.created_at,
        })
    }
}

/// Names of the descriptive fields that differ between two versions of a card.
fn changed_fields(origin: &Card, saved: &Card) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if origin.title != saved.title {
        fields.push("title");
    }
    if origin.content != saved.content {
        fields.push("content");
    }
    if origin.stage_id != saved.stage_id {
        fields.push("stage_id");
    }
    if origin.parent_id != saved.parent_id {
        fields.push("parent_id");
    }
    if origin.sort_number != saved.sort_number {
        fields.push("sort_number");
    }
    if origin.deadline != saved.deadline {
        fields.push("deadline");
    }
    if origin.code != saved.code {
        fields.push("code");
    }
    fields
}

fn card_label(card: &Card) -> String {
    match &card.code {
        Some(code) if !code.is_empty() => format!("{} ({})", card.title, code),
        _ => card.title.clone(),
    }
}

// ── Port implementations ──────────────────────────────────────────────

#[async_trait]
impl CardStore for DbHandle {
    async fn create(&self, author: &str, record: CardRecord) -> Result<String> {
        let author = author.to_string();
        self.call(move |db| db.insert_card(&author, &record)).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Card>> {
        let id = id.to_string();
        self.call(move |db| db.get_card(&id)).await
    }

    async fn find_by_stage_id(&self, stage_id: &str) -> Result<Vec<Card>> {
        let stage_id = stage_id.to_string();
        self.call(move |db| db.list_cards_by_stage(&stage_id)).await
    }

    async fn find_by_parent_id(&self, parent_id: &str) -> Result<Vec<Card>> {
        let parent_id = parent_id.to_string();
        self.call(move |db| db.list_child_cards(&parent_id)).await
    }

    async fn modify(&self, id: &str, changes: CardChanges) -> Result<usize> {
        let id = id.to_string();
        self.call(move |db| db.update_card(&id, &changes)).await
    }

    async fn move_card(&self, id: &str, stage_id: &str, sort_number: i64) -> Result<usize> {
        let id = id.to_string();
        let stage_id = stage_id.to_string();
        self.call(move |db| db.move_card(&id, &stage_id, sort_number))
            .await
    }

    async fn delete_by_id(&self, id: &str) -> Result<usize> {
        let id = id.to_string();
        self.call(move |db| db.delete_card(&id)).await
    }

    async fn has_child(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.call(move |db| db.has_child(&id)).await
    }

    async fn total_cards_created(&self, board_id: &str, period: &str) -> Result<u32> {
        let board_id = board_id.to_string();
        let period = period.to_string();
        self.call(move |db| db.total_cards_created(&board_id, &period))
            .await
    }
}

#[async_trait]
impl StageStore for DbHandle {
    async fn find_stage(&self, id: &str) -> Result<Option<Stage>> {
        let id = id.to_string();
        self.call(move |db| db.get_stage(&id)).await
    }

    async fn find_stages_by_board_id(&self, board_id: &str) -> Result<Vec<Stage>> {
        let board_id = board_id.to_string();
        self.call(move |db| db.list_stages(&board_id)).await
    }

    async fn count_cards_in_stage(&self, stage_id: &str) -> Result<u32> {
        let stage_id = stage_id.to_string();
        self.call(move |db| db.count_cards_in_stage(&stage_id)).await
    }
}

#[async_trait]
impl BoardStore for DbHandle {
    async fn find_board(&self, id: &str) -> Result<Option<Board>> {
        let id = id.to_string();
        self.call(move |db| db.get_board(&id)).await
    }
}

#[async_trait]
impl CriteriaStore for DbHandle {
    async fn find_criteria_by_card_id(&self, card_id: &str) -> Result<Vec<AcceptanceCriterion>> {
        let card_id = card_id.to_string();
        self.call(move |db| db.list_criteria(&card_id)).await
    }

    async fn add_criterion(
        &self,
        author: &str,
        card_id: &str,
        summary: &str,
    ) -> Result<AcceptanceCriterion> {
        let (author, card_id, summary) =
            (author.to_string(), card_id.to_string(), summary.to_string());
        self.call(move |db| db.add_criterion(&author, &card_id, &summary))
            .await
    }

    async fn update_criterion(
        &self,
        id: &str,
        finished: bool,
        status: CriterionStatus,
    ) -> Result<Option<AcceptanceCriterion>> {
        let id = id.to_string();
        self.call(move |db| db.update_criterion(&id, finished, status))
            .await
    }
}

#[async_trait]
impl ActivityRecorder for DbHandle {
    async fn record_card_creation(&self, card: &Card, stage: &Stage, actor: &str) -> Result<()> {
        let summary = format!(
            "{} created card {} in stage {}",
            actor,
            card_label(card),
            stage.title
        );
        let detail = json!({ "card": card, "stage": stage });
        let (card_id, actor) = (card.id.clone(), actor.to_string());
        self.call(move |db| {
            db.insert_activity(&card_id, ActivityKind::CardCreated, &summary, &detail, &actor)
        })
        .await?;
        Ok(())
    }

    async fn record_card_modification(
        &self,
        saved: &Card,
        origin: &Card,
        actor: &str,
    ) -> Result<()> {
        let changed = changed_fields(origin, saved);
        let summary = format!("{} modified card {}", actor, card_label(saved));
        let detail = json!({ "origin": origin, "saved": saved, "changed": changed });
        let (card_id, actor) = (saved.id.clone(), actor.to_string());
        self.call(move |db| {
            db.insert_activity(&card_id, ActivityKind::CardModified, &summary, &detail, &actor)
        })
        .await?;
        Ok(())
    }

    async fn record_stage_transition(
        &self,
        card_id: &str,
        target_stage: &Stage,
        origin_stage: &Stage,
        origin: &Card,
        actor: &str,
    ) -> Result<()> {
        let summary = format!(
            "{} moved card {} from {} to {}",
            actor,
            card_label(origin),
            origin_stage.title,
            target_stage.title
        );
        let detail = json!({
            "from": origin_stage,
            "to": target_stage,
            "origin": origin,
        });
        let (card_id, actor) = (card_id.to_string(), actor.to_string());
        self.call(move |db| {
            db.insert_activity(&card_id, ActivityKind::CardMoved, &summary, &detail, &actor)
        })
        .await?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(board_id: &str, stage_id: &str, title: &str, code: &str) -> CardRecord {
        CardRecord {
            board_id: board_id.to_string(),
            code: code.to_string(),
            period: "1601".to_string(),
            title: title.to_string(),
            content: None,
            stage_id: stage_id.to_string(),
            parent_id: None,
            sort_number: None,
            deadline: None,
        }
    }

    fn board_with_stage(db: &KanbanDb) -> Result<(Board, Stage)> {
        let board = db.create_board("Team board", "KB-")?;
        let stage = db.create_stage(&board.id, "Todo", StageStatus::Todo, None)?;
        Ok((board, stage))
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = KanbanDb::new_in_memory()?;

        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('boards', 'stages', 'cards', 'acceptance_criteria', 'activities')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 5, "Expected 5 tables to exist");

        let index_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name IN ('idx_cards_stage', 'idx_cards_parent', 'idx_cards_board_period')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(index_count, 3, "Expected 3 card indexes to exist");

        Ok(())
    }

    #[test]
    fn test_migrations_are_idempotent() -> Result<()> {
        let db = KanbanDb::new_in_memory()?;
        db.run_migrations()?;
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_stages_are_ordered_by_creation() -> Result<()> {
        let db = KanbanDb::new_in_memory()?;
        let board = db.create_board("Board", "KB-")?;
        db.create_stage(&board.id, "Todo", StageStatus::Todo, None)?;
        db.create_stage(&board.id, "Doing", StageStatus::InProcess, Some(3))?;
        db.create_stage(&board.id, "Done", StageStatus::Done, None)?;

        let stages = db.list_stages(&board.id)?;
        let titles: Vec<_> = stages.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Todo", "Doing", "Done"]);
        assert_eq!(stages[1].wip_limit, Some(3));
        assert_eq!(stages[1].status, StageStatus::InProcess);
        Ok(())
    }

    #[test]
    fn test_insert_card_appends_to_stage() -> Result<()> {
        let db = KanbanDb::new_in_memory()?;
        let (board, stage) = board_with_stage(&db)?;

        let first = db.insert_card("alice", &record(&board.id, &stage.id, "First", "KB-160101"))?;
        let second = db.insert_card("alice", &record(&board.id, &stage.id, "Second", "KB-160102"))?;

        let cards = db.list_cards_by_stage(&stage.id)?;
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].id, first);
        assert_eq!(cards[0].sort_number, 0);
        assert_eq!(cards[1].id, second);
        assert_eq!(cards[1].sort_number, 1);
        assert_eq!(cards[1].code.as_deref(), Some("KB-160102"));
        assert_eq!(cards[1].author, "alice");
        Ok(())
    }

    #[test]
    fn test_deadline_round_trips_through_storage() -> Result<()> {
        let db = KanbanDb::new_in_memory()?;
        let (board, stage) = board_with_stage(&db)?;
        let deadline = DateTime::parse_from_rfc3339("2016-01-31T18:00:00Z")?.with_timezone(&Utc);

        let mut rec = record(&board.id, &stage.id, "Due", "KB-160101");
        rec.deadline = Some(deadline);
        let id = db.insert_card("alice", &rec)?;

        let card = db.get_card(&id)?.expect("card should exist");
        assert_eq!(card.deadline, Some(deadline));
        Ok(())
    }

    #[test]
    fn test_soft_deleted_cards_still_count_for_period() -> Result<()> {
        let db = KanbanDb::new_in_memory()?;
        let (board, stage) = board_with_stage(&db)?;
        let id = db.insert_card("alice", &record(&board.id, &stage.id, "Gone", "KB-160101"))?;

        assert_eq!(db.delete_card(&id)?, 1);
        assert!(db.get_card(&id)?.is_none());
        assert!(db.list_cards_by_stage(&stage.id)?.is_empty());
        assert_eq!(db.count_cards_in_stage(&stage.id)?, 0);
        assert_eq!(db.total_cards_created(&board.id, "1601")?, 1);
        assert_eq!(db.total_cards_created(&board.id, "1602")?, 0);

        // Deleting twice touches nothing.
        assert_eq!(db.delete_card(&id)?, 0);
        Ok(())
    }

    #[test]
    fn test_children_and_has_child() -> Result<()> {
        let db = KanbanDb::new_in_memory()?;
        let (board, stage) = board_with_stage(&db)?;
        let parent = db.import_card(&board.id, &stage.id, "Parent", None)?;
        assert!(!db.has_child(&parent.id)?);

        let child = db.import_card(&board.id, &stage.id, "Child", Some(&parent.id))?;
        assert!(db.has_child(&parent.id)?);
        let children = db.list_child_cards(&parent.id)?;
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);
        assert_eq!(children[0].code, None);
        Ok(())
    }

    #[test]
    fn test_move_and_update_card() -> Result<()> {
        let db = KanbanDb::new_in_memory()?;
        let (board, todo) = board_with_stage(&db)?;
        let doing = db.create_stage(&board.id, "Doing", StageStatus::InProcess, None)?;
        let card = db.import_card(&board.id, &todo.id, "Move me", None)?;

        assert_eq!(db.move_card(&card.id, &doing.id, 7)?, 1);
        let moved = db.get_card(&card.id)?.expect("card should exist");
        assert_eq!(moved.stage_id, doing.id);
        assert_eq!(moved.sort_number, 7);

        let changes = CardChanges {
            code: Some("KB-160101".into()),
            title: "Renamed".into(),
            content: Some("body".into()),
            stage_id: doing.id.clone(),
            parent_id: None,
            sort_number: 2,
            deadline: None,
        };
        assert_eq!(db.update_card(&card.id, &changes)?, 1);
        let updated = db.get_card(&card.id)?.expect("card should exist");
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.content.as_deref(), Some("body"));
        assert_eq!(updated.code.as_deref(), Some("KB-160101"));
        assert_eq!(updated.sort_number, 2);
        Ok(())
    }

    #[test]
    fn test_criteria_add_and_update() -> Result<()> {
        let db = KanbanDb::new_in_memory()?;
        let (board, stage) = board_with_stage(&db)?;
        let card = db.import_card(&board.id, &stage.id, "Card", None)?;

        let ac = db.add_criterion("alice", &card.id, "Login works")?;
        assert!(!ac.finished);
        assert_eq!(ac.status, CriterionStatus::Unverified);
        db.add_criterion("alice", &card.id, "Logout works")?;

        let updated = db
            .update_criterion(&ac.id, true, CriterionStatus::Passed)?
            .expect("criterion should exist");
        assert!(updated.finished);
        assert_eq!(updated.status, CriterionStatus::Passed);

        let all = db.list_criteria(&card.id)?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].summary, "Login works");
        assert_eq!(all[1].sort_number, 1);

        assert!(db.update_criterion("missing", true, CriterionStatus::Passed)?.is_none());
        Ok(())
    }

    #[test]
    fn test_activities_keep_detail_json() -> Result<()> {
        let db = KanbanDb::new_in_memory()?;
        let detail = json!({ "from": "todo", "to": "doing" });
        db.insert_activity("card-1", ActivityKind::CardMoved, "moved", &detail, "bob")?;

        let activities = db.list_activities("card-1")?;
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].kind, ActivityKind::CardMoved);
        assert_eq!(activities[0].detail["to"], "doing");
        assert_eq!(activities[0].actor, "bob");
        Ok(())
    }

    #[tokio::test]
    async fn test_activity_recorder_writes_modification_diff() -> Result<()> {
        let handle = DbHandle::new(KanbanDb::new_in_memory()?);
        let (origin, saved) = {
            let db = handle.lock_sync()?;
            let (board, stage) = board_with_stage(&db)?;
            let origin = db.import_card(&board.id, &stage.id, "Before", None)?;
            let mut saved = origin.clone();
            saved.title = "After".into();
            (origin, saved)
        };

        handle
            .record_card_modification(&saved, &origin, "carol")
            .await?;

        let activities = handle.lock_sync()?.list_activities(&origin.id)?;
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].kind, ActivityKind::CardModified);
        assert_eq!(activities[0].detail["changed"], json!(["title"]));
        assert!(activities[0].summary.contains("carol"));
        Ok(())
    }
}
