use std::sync::Arc;

use tracing::debug;

use super::locks::{KeyedGuard, KeyedLocks};
use super::models::Stage;
use super::ports::StageStore;
use crate::errors::{CardError, CardResult};

/// Stage metadata and the stage predicates the engine gates on.
#[derive(Clone)]
pub struct StageRegistry {
    store: Arc<dyn StageStore>,
    admission: KeyedLocks,
}

impl StageRegistry {
    pub fn new(store: Arc<dyn StageStore>) -> Self {
        Self {
            store,
            admission: KeyedLocks::new(),
        }
    }

    /// Serializes placing cards into `stage_id`. Hold the guard from the
    /// WIP check until the card is stored in the stage.
    pub async fn admit(&self, stage_id: &str) -> KeyedGuard {
        self.admission.acquire(stage_id).await
    }

    pub async fn find_by_id(&self, stage_id: &str) -> CardResult<Stage> {
        self.store
            .find_stage(stage_id)
            .await?
            .ok_or_else(|| CardError::stage_not_found(stage_id))
    }

    pub async fn find_by_board_id(&self, board_id: &str) -> CardResult<Vec<Stage>> {
        Ok(self.store.find_stages_by_board_id(board_id).await?)
    }

    pub async fn is_reached_wip_limit(&self, stage_id: &str) -> CardResult<bool> {
        let stage = self.find_by_id(stage_id).await?;
        self.wip_reached(&stage).await
    }

    pub async fn is_done_or_archived(&self, stage_id: &str) -> CardResult<bool> {
        Ok(self.find_by_id(stage_id).await?.status.is_done_or_archived())
    }

    /// Cards sitting in a done or archived stage are not active, so such
    /// stages never report their limit as reached.
    pub(crate) async fn wip_reached(&self, stage: &Stage) -> CardResult<bool> {
        let Some(limit) = stage.wip_limit else {
            return Ok(false);
        };
        if stage.status.is_done_or_archived() {
            return Ok(false);
        }
        let active = self.store.count_cards_in_stage(&stage.id).await?;
        debug!(stage_id = %stage.id, active, limit, "checked WIP limit");
        Ok(active >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::db::{DbHandle, KanbanDb};
    use crate::workflow::models::StageStatus;

    fn registry() -> (DbHandle, StageRegistry) {
        let db = DbHandle::new(KanbanDb::new_in_memory().unwrap());
        let registry = StageRegistry::new(Arc::new(db.clone()));
        (db, registry)
    }

    #[tokio::test]
    async fn test_missing_stage_is_not_found() {
        let (_db, registry) = registry();
        let err = registry.find_by_id("nope").await.unwrap_err();
        assert_eq!(err.code(), "STAGE_IS_NOT_EXISTS");
    }

    #[tokio::test]
    async fn test_wip_limit_counts_cards_in_stage() {
        let (db, registry) = registry();
        let (stage_id, board_id) = {
            let guard = db.lock_sync().unwrap();
            let board = guard.create_board("Board", "KB-").unwrap();
            let stage = guard
                .create_stage(&board.id, "Doing", StageStatus::InProcess, Some(1))
                .unwrap();
            (stage.id, board.id)
        };
        assert!(!registry.is_reached_wip_limit(&stage_id).await.unwrap());

        db.lock_sync()
            .unwrap()
            .import_card(&board_id, &stage_id, "Busy", None)
            .unwrap();
        assert!(registry.is_reached_wip_limit(&stage_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_stage_without_limit_is_never_full() {
        let (db, registry) = registry();
        let stage_id = {
            let guard = db.lock_sync().unwrap();
            let board = guard.create_board("Board", "KB-").unwrap();
            let stage = guard
                .create_stage(&board.id, "Todo", StageStatus::Todo, None)
                .unwrap();
            for i in 0..5 {
                guard
                    .import_card(&board.id, &stage.id, &format!("Card {i}"), None)
                    .unwrap();
            }
            stage.id
        };
        assert!(!registry.is_reached_wip_limit(&stage_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_done_stage_limit_ignores_finished_cards() {
        let (db, registry) = registry();
        let stage_id = {
            let guard = db.lock_sync().unwrap();
            let board = guard.create_board("Board", "KB-").unwrap();
            let stage = guard
                .create_stage(&board.id, "Done", StageStatus::Done, Some(1))
                .unwrap();
            guard
                .import_card(&board.id, &stage.id, "Finished", None)
                .unwrap();
            stage.id
        };
        assert!(!registry.is_reached_wip_limit(&stage_id).await.unwrap());
        assert!(registry.is_done_or_archived(&stage_id).await.unwrap());
    }
}
