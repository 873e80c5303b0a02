//! Collaborator contracts consumed by the workflow engine.
//!
//! Adapters return `anyhow::Result`; the engine lifts their failures into
//! `CardError::Storage` unchanged. `db::DbHandle` implements every trait.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{Board, Card, CardChanges, CardRecord, Stage};

#[async_trait]
pub trait CardStore: Send + Sync {
    /// Insert a card authored by `author`, returning its new id.
    async fn create(&self, author: &str, record: CardRecord) -> Result<String>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Card>>;

    /// Cards placed in a stage, ordered by sort number.
    async fn find_by_stage_id(&self, stage_id: &str) -> Result<Vec<Card>>;

    async fn find_by_parent_id(&self, parent_id: &str) -> Result<Vec<Card>>;

    async fn modify(&self, id: &str, changes: CardChanges) -> Result<usize>;

    async fn move_card(&self, id: &str, stage_id: &str, sort_number: i64) -> Result<usize>;

    async fn delete_by_id(&self, id: &str) -> Result<usize>;

    async fn has_child(&self, id: &str) -> Result<bool>;

    /// Cards ever created in the board during `period`, deleted ones included.
    async fn total_cards_created(&self, board_id: &str, period: &str) -> Result<u32>;
}

#[async_trait]
pub trait StageStore: Send + Sync {
    async fn find_stage(&self, id: &str) -> Result<Option<Stage>>;

    /// Stages of a board, ordered by sort number.
    async fn find_stages_by_board_id(&self, board_id: &str) -> Result<Vec<Stage>>;

    async fn count_cards_in_stage(&self, stage_id: &str) -> Result<u32>;
}

#[async_trait]
pub trait BoardStore: Send + Sync {
    async fn find_board(&self, id: &str) -> Result<Option<Board>>;
}

/// Activity feed. Calls are fire-and-forget from the engine's side: a
/// failure is logged and never undoes the mutation that triggered it.
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    async fn record_card_creation(&self, card: &Card, stage: &Stage, actor: &str) -> Result<()>;

    async fn record_card_modification(
        &self,
        saved: &Card,
        origin: &Card,
        actor: &str,
    ) -> Result<()>;

    async fn record_stage_transition(
        &self,
        card_id: &str,
        target_stage: &Stage,
        origin_stage: &Stage,
        origin: &Card,
        actor: &str,
    ) -> Result<()>;
}
