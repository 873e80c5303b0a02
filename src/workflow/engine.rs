use std::collections::HashSet;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use super::acceptance::{AcceptanceGate, CriteriaStore};
use super::code::{Clock, CodeGenerator};
use super::db::DbHandle;
use super::models::*;
use super::ports::{ActivityRecorder, BoardStore, CardStore, StageStore};
use super::stage::StageRegistry;
use crate::errors::{CardError, CardResult, Missing, ValidationRule};

/// Everything the engine talks to. `DbHandle` can fill every slot.
#[derive(Clone)]
pub struct Collaborators {
    pub cards: Arc<dyn CardStore>,
    pub stages: Arc<dyn StageStore>,
    pub criteria: Arc<dyn CriteriaStore>,
    pub boards: Arc<dyn BoardStore>,
    pub activity: Arc<dyn ActivityRecorder>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn sqlite(db: DbHandle, clock: Arc<dyn Clock>) -> Self {
        let db = Arc::new(db);
        Self {
            cards: db.clone(),
            stages: db.clone(),
            criteria: db.clone(),
            boards: db.clone(),
            activity: db,
            clock,
        }
    }
}

/// Card lifecycle operations and the rules that gate them.
///
/// Reads here hit storage directly; `CardService` puts the cache in front.
pub struct CardWorkflow {
    cards: Arc<dyn CardStore>,
    boards: Arc<dyn BoardStore>,
    activity: Arc<dyn ActivityRecorder>,
    stages: StageRegistry,
    gate: AcceptanceGate,
    codes: CodeGenerator,
}

impl CardWorkflow {
    pub fn new(collaborators: Collaborators) -> Self {
        let Collaborators {
            cards,
            stages,
            criteria,
            boards,
            activity,
            clock,
        } = collaborators;
        Self {
            codes: CodeGenerator::new(boards.clone(), cards.clone(), clock),
            stages: StageRegistry::new(stages),
            gate: AcceptanceGate::new(criteria),
            cards,
            boards,
            activity,
        }
    }

    pub fn stages(&self) -> &StageRegistry {
        &self.stages
    }

    pub fn acceptance(&self) -> &AcceptanceGate {
        &self.gate
    }

    pub fn codes(&self) -> &CodeGenerator {
        &self.codes
    }

    // ── Mutations ─────────────────────────────────────────────────────

    pub async fn create_card(
        &self,
        user_name: &str,
        board_id: &str,
        card: NewCard,
    ) -> CardResult<Card> {
        info!(board_id, title = %card.title, "creating card");
        let stage_id = card
            .stage_id
            .clone()
            .ok_or(ValidationRule::StageNotSpecified)?;
        let stage = self.stages.find_by_id(&stage_id).await?;
        if stage.board_id != board_id {
            return Err(CardError::stage_not_found(&stage_id));
        }
        if !stage.is_todo() {
            return Err(ValidationRule::StageNotTodo.into());
        }

        let id = {
            let _admission = self.stages.admit(&stage_id).await;
            if self.stages.wip_reached(&stage).await? {
                return Err(ValidationRule::WipLimitReached.into());
            }
            if let Some(parent_id) = card.parent_id.as_deref() {
                self.ensure_parent_open(parent_id).await?;
            }
            let reservation = self.codes.reserve(board_id).await?;
            let record = CardRecord {
                board_id: board_id.to_string(),
                code: reservation.code.clone(),
                period: reservation.period.clone(),
                title: card.title,
                content: card.content,
                stage_id,
                parent_id: card.parent_id,
                sort_number: card.sort_number,
                deadline: card.deadline,
            };
            self.cards.create(user_name, record).await?
        };

        let saved = self.load(&id).await?;
        info!(card_id = %saved.id, code = ?saved.code, "created card");
        log_activity_failure(
            self.activity
                .record_card_creation(&saved, &stage, user_name)
                .await,
            "creation",
            &saved.id,
        );
        Ok(saved)
    }

    /// Replaces a card's fields. `stage_id` and `board_id` name the context
    /// the caller edits in; the board is used when the card still needs a
    /// code.
    pub async fn modify(
        &self,
        card_id: &str,
        update: CardUpdate,
        stage_id: &str,
        board_id: &str,
        user_name: &str,
    ) -> CardResult<Modified> {
        info!(card_id, stage_id, board_id, "modifying card");
        if self.is_card_archived_or_done(card_id).await? {
            return Err(ValidationRule::CardArchivedOrDone.into());
        }
        let origin = self.load(card_id).await?;
        let mut admission = None;
        if update.moves_to_other_stage(&origin)
            && let Some(target) = update.stage_id.as_deref()
        {
            admission = Some(self.stages.admit(target).await);
            self.validate_stage_transition(&origin, target, user_name)
                .await?;
        }
        if update.moves_to_parent(&origin)
            && let Some(parent_id) = update.parent_id.as_deref()
        {
            self.validate_parent_assignment(card_id, parent_id).await?;
        }

        let mut changes = CardChanges {
            code: origin.code.clone(),
            title: update.title,
            content: update.content,
            stage_id: update.stage_id.unwrap_or_else(|| origin.stage_id.clone()),
            parent_id: update.parent_id,
            sort_number: update.sort_number.unwrap_or(origin.sort_number),
            deadline: update.deadline,
        };
        if origin.has_code() {
            self.cards.modify(card_id, changes).await?;
        } else {
            let reservation = self.codes.reserve(board_id).await?;
            changes.code = Some(reservation.code.clone());
            self.cards.modify(card_id, changes).await?;
        }
        drop(admission);

        let saved = self.load(card_id).await?;
        info!(card_id, "modified card");
        log_activity_failure(
            self.activity
                .record_card_modification(&saved, &origin, user_name)
                .await,
            "modification",
            card_id,
        );
        Ok(Modified {
            card: saved,
            origin,
        })
    }

    /// Moves a batch of cards one by one and returns the cards of
    /// `stage_id` afterwards.
    ///
    /// The batch is not atomic. When a card fails validation the error is
    /// returned and the cards moved before it stay moved.
    pub async fn move_cards(
        &self,
        cards_to_move: &[CardMove],
        stage_id: &str,
        board_id: &str,
        user_name: &str,
    ) -> CardResult<MovedCards> {
        info!(stage_id, board_id, count = cards_to_move.len(), "moving cards");
        let mut origins = Vec::with_capacity(cards_to_move.len());
        for card_move in cards_to_move {
            let origin = self.load(&card_move.id).await?;
            let mut admission = None;
            if card_move.stage_id != origin.stage_id {
                admission = Some(self.stages.admit(&card_move.stage_id).await);
                self.validate_stage_transition(&origin, &card_move.stage_id, user_name)
                    .await?;
            }
            self.cards
                .move_card(&card_move.id, &card_move.stage_id, card_move.sort_number)
                .await?;
            drop(admission);
            origins.push(origin);
        }
        let cards = self.cards.find_by_stage_id(stage_id).await?;
        Ok(MovedCards { cards, origins })
    }

    /// Deletes a card and, before it, all of its descendants.
    ///
    /// The whole subtree is checked first: if any card in it sits in a
    /// done or archived stage nothing is deleted.
    pub async fn delete_by_id(&self, card_id: &str) -> CardResult<Deleted> {
        let mut visited = HashSet::new();
        let mut removed = Vec::new();
        self.collect_subtree(card_id, &mut visited, &mut removed)
            .await?;

        let mut count = 0;
        for card in &removed {
            info!(card_id = %card.id, "deleting card");
            let deleted = self.cards.delete_by_id(&card.id).await?;
            if card.id == card_id {
                count = deleted;
            }
        }
        Ok(Deleted { count, removed })
    }

    /// Pushes `card_id` and its descendants onto `subtree`, children before
    /// their parent.
    fn collect_subtree<'a>(
        &'a self,
        card_id: &'a str,
        visited: &'a mut HashSet<String>,
        subtree: &'a mut Vec<Card>,
    ) -> BoxFuture<'a, CardResult<()>> {
        async move {
            if !visited.insert(card_id.to_string()) {
                warn!(card_id, "parent chain loops back to a visited card");
                return Ok(());
            }
            let card = self.load(card_id).await?;
            if self.stages.is_done_or_archived(&card.stage_id).await? {
                return Err(ValidationRule::CardArchivedOrDone.into());
            }
            let children = self.cards.find_by_parent_id(card_id).await?;
            for child in &children {
                self.collect_subtree(&child.id, visited, subtree).await?;
            }
            subtree.push(card);
            Ok(())
        }
        .boxed()
    }

    /// Administrative move into an archived stage. Skips stage-transition
    /// validation on purpose; keep it separate from `modify`.
    pub async fn archive(
        &self,
        card_id: &str,
        archived_stage_id: &str,
        sort_number: i64,
        user_name: &str,
    ) -> CardResult<Modified> {
        info!(card_id, archived_stage_id, user_name, "archiving card");
        let origin = self.load(card_id).await?;
        self.stages.find_by_id(archived_stage_id).await?;
        self.cards
            .move_card(card_id, archived_stage_id, sort_number)
            .await?;
        let card = self.load(card_id).await?;
        Ok(Modified { card, origin })
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub async fn find_by_id(&self, card_id: &str) -> CardResult<Option<Card>> {
        debug!(card_id, "loading card");
        Ok(self.cards.find_by_id(card_id).await?)
    }

    /// Like `find_by_id`, but a missing card is an error.
    pub async fn load_card(&self, card_id: &str) -> CardResult<Card> {
        self.load(card_id).await
    }

    pub async fn find_by_stage_id(&self, stage_id: &str) -> CardResult<Vec<Card>> {
        debug!(stage_id, "loading cards by stage");
        Ok(self.cards.find_by_stage_id(stage_id).await?)
    }

    pub async fn find_by_parent_id(&self, card_id: &str) -> CardResult<Vec<Card>> {
        debug!(card_id, "loading child cards");
        Ok(self.cards.find_by_parent_id(card_id).await?)
    }

    pub async fn is_card_archived_or_done(&self, card_id: &str) -> CardResult<bool> {
        let card = self.load(card_id).await?;
        self.stages.is_done_or_archived(&card.stage_id).await
    }

    pub async fn board_view(&self, board_id: &str) -> CardResult<BoardView> {
        let board = self
            .boards
            .find_board(board_id)
            .await?
            .ok_or_else(|| Missing::Board {
                id: board_id.to_string(),
            })?;
        let mut stages = Vec::new();
        for stage in self.stages.find_by_board_id(board_id).await? {
            let cards = self.cards.find_by_stage_id(&stage.id).await?;
            stages.push(StageView { stage, cards });
        }
        Ok(BoardView { board, stages })
    }

    // ── Validation ────────────────────────────────────────────────────

    async fn validate_stage_transition(
        &self,
        origin: &Card,
        target_stage_id: &str,
        user_name: &str,
    ) -> CardResult<()> {
        let origin_stage = self.stages.find_by_id(&origin.stage_id).await?;
        let target_stage = self.stages.find_by_id(target_stage_id).await?;
        if target_stage.is_archived() {
            return Err(ValidationRule::TargetStageArchived.into());
        }
        if self.stages.wip_reached(&target_stage).await? {
            return Err(ValidationRule::WipLimitReached.into());
        }
        if target_stage.is_in_process() && origin.deadline.is_none() {
            return Err(ValidationRule::DeadlineNotSet.into());
        }
        if target_stage.is_done() {
            self.gate.verify_ready_for_done(&origin.id).await?;
        }
        log_activity_failure(
            self.activity
                .record_stage_transition(&origin.id, &target_stage, &origin_stage, origin, user_name)
                .await,
            "stage transition",
            &origin.id,
        );
        Ok(())
    }

    async fn validate_parent_assignment(&self, card_id: &str, parent_id: &str) -> CardResult<()> {
        let parent = self.find_parent(parent_id).await?;
        if parent.id == card_id {
            return Err(ValidationRule::CannotParentItself.into());
        }
        if self.cards.has_child(card_id).await? {
            return Err(ValidationRule::HasChildCard.into());
        }
        if self.stages.is_done_or_archived(&parent.stage_id).await? {
            return Err(ValidationRule::ParentArchivedOrDone.into());
        }
        Ok(())
    }

    async fn ensure_parent_open(&self, parent_id: &str) -> CardResult<()> {
        let parent = self.find_parent(parent_id).await?;
        if self.stages.is_done_or_archived(&parent.stage_id).await? {
            return Err(ValidationRule::ParentArchivedOrDone.into());
        }
        Ok(())
    }

    async fn find_parent(&self, parent_id: &str) -> CardResult<Card> {
        self.cards
            .find_by_id(parent_id)
            .await?
            .ok_or_else(|| {
                Missing::ParentCard {
                    id: parent_id.to_string(),
                }
                .into()
            })
    }

    async fn load(&self, card_id: &str) -> CardResult<Card> {
        self.cards
            .find_by_id(card_id)
            .await?
            .ok_or_else(|| CardError::card_not_found(card_id))
    }
}

fn log_activity_failure(result: anyhow::Result<()>, what: &str, card_id: &str) {
    if let Err(e) = result {
        warn!(card_id, error = %e, "failed to record card {} activity", what);
    }
}
