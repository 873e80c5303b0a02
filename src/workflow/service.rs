use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::cache::{CacheKey, CacheStats, Tag, TaggedCache};
use super::code::Clock;
use super::db::DbHandle;
use super::engine::{CardWorkflow, Collaborators};
use super::models::*;
use crate::errors::{CardError, CardResult};

/// Front door for card operations: reads go through the tagged cache,
/// mutations go to the engine and then evict what they touched.
pub struct CardService {
    engine: CardWorkflow,
    cache: TaggedCache,
}

impl CardService {
    pub fn new(engine: CardWorkflow, cache_enabled: bool) -> Self {
        Self {
            engine,
            cache: TaggedCache::new(cache_enabled),
        }
    }

    pub fn sqlite(db: DbHandle, clock: Arc<dyn Clock>, cache_enabled: bool) -> Self {
        Self::new(
            CardWorkflow::new(Collaborators::sqlite(db, clock)),
            cache_enabled,
        )
    }

    pub fn engine(&self) -> &CardWorkflow {
        &self.engine
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ── Mutations ─────────────────────────────────────────────────────

    pub async fn create_card(
        &self,
        user_name: &str,
        board_id: &str,
        card: NewCard,
    ) -> CardResult<Card> {
        let result = self.engine.create_card(user_name, board_id, card).await;
        let card = self.settle(result, false)?;
        let mut tags = card_tags(&card);
        tags.insert(Tag::Board(board_id.to_string()));
        self.cache.invalidate(tags);
        Ok(card)
    }

    pub async fn modify(
        &self,
        card_id: &str,
        update: CardUpdate,
        stage_id: &str,
        board_id: &str,
        user_name: &str,
    ) -> CardResult<Card> {
        let result = self
            .engine
            .modify(card_id, update, stage_id, board_id, user_name)
            .await;
        let modified = self.settle(result, false)?;
        let mut tags = modified_tags(&modified);
        tags.insert(Tag::Board(board_id.to_string()));
        tags.insert(Tag::Stage(stage_id.to_string()));
        self.cache.invalidate(tags);
        Ok(modified.card)
    }

    /// A failed batch may have moved some cards already, so any error
    /// flushes the whole cache.
    pub async fn move_cards(
        &self,
        cards_to_move: &[CardMove],
        stage_id: &str,
        board_id: &str,
        user_name: &str,
    ) -> CardResult<Vec<Card>> {
        let result = self
            .engine
            .move_cards(cards_to_move, stage_id, board_id, user_name)
            .await;
        let moved = self.settle(result, true)?;
        let mut tags: HashSet<Tag> = moved.origins.iter().flat_map(card_tags).collect();
        tags.extend(
            cards_to_move
                .iter()
                .map(|m| Tag::Stage(m.stage_id.clone())),
        );
        tags.insert(Tag::Board(board_id.to_string()));
        tags.insert(Tag::Stage(stage_id.to_string()));
        self.cache.invalidate(tags);
        Ok(moved.cards)
    }

    /// Returns the row count reported for `card_id` itself.
    pub async fn delete_by_id(&self, card_id: &str) -> CardResult<usize> {
        let result = self.engine.delete_by_id(card_id).await;
        let deleted = self.settle(result, true)?;
        let tags: HashSet<Tag> = deleted.removed.iter().flat_map(card_tags).collect();
        self.cache.invalidate(tags);
        Ok(deleted.count)
    }

    pub async fn archive(
        &self,
        card_id: &str,
        archived_stage_id: &str,
        sort_number: i64,
        user_name: &str,
    ) -> CardResult<Card> {
        let result = self
            .engine
            .archive(card_id, archived_stage_id, sort_number, user_name)
            .await;
        let modified = self.settle(result, false)?;
        self.cache.invalidate(modified_tags(&modified));
        Ok(modified.card)
    }

    /// Storage errors can surface after a write landed, and `partial`
    /// operations commit piecemeal; either way cached reads may be stale.
    fn settle<T>(&self, result: CardResult<T>, partial: bool) -> CardResult<T> {
        if let Err(e) = &result
            && (partial || matches!(e, CardError::Storage(_)))
        {
            warn!(error = %e, "mutation failed; flushing card cache");
            self.cache.flush();
        }
        result
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub async fn find_by_stage_id(&self, stage_id: &str) -> CardResult<Vec<Card>> {
        self.cache
            .get_or_load(CacheKey::CardsByStage(stage_id.to_string()), || async move {
                let cards = self.engine.find_by_stage_id(stage_id).await?;
                let mut tags: HashSet<Tag> = cards.iter().flat_map(card_tags).collect();
                tags.insert(Tag::Stage(stage_id.to_string()));
                Ok::<_, CardError>((cards, tags))
            })
            .await
    }

    pub async fn find_by_id(&self, card_id: &str) -> CardResult<Option<Card>> {
        self.cache
            .get_or_load(CacheKey::Card(card_id.to_string()), || async move {
                let card = self.engine.find_by_id(card_id).await?;
                let mut tags = card.as_ref().map(card_tags).unwrap_or_default();
                tags.insert(Tag::Card(card_id.to_string()));
                Ok::<_, CardError>((card, tags))
            })
            .await
    }

    pub async fn load_card(&self, card_id: &str) -> CardResult<Card> {
        self.find_by_id(card_id)
            .await?
            .ok_or_else(|| CardError::card_not_found(card_id))
    }

    pub async fn find_by_parent_id(&self, card_id: &str) -> CardResult<Vec<Card>> {
        self.cache
            .get_or_load(CacheKey::CardsByParent(card_id.to_string()), || async move {
                let children = self.engine.find_by_parent_id(card_id).await?;
                let mut tags: HashSet<Tag> = children.iter().flat_map(card_tags).collect();
                tags.insert(Tag::Card(card_id.to_string()));
                Ok::<_, CardError>((children, tags))
            })
            .await
    }

    pub async fn is_card_archived_or_done(&self, card_id: &str) -> CardResult<bool> {
        self.cache
            .get_or_load(CacheKey::ArchivedOrDone(card_id.to_string()), || async move {
                let card = self.engine.load_card(card_id).await?;
                let flag = self
                    .engine
                    .stages()
                    .is_done_or_archived(&card.stage_id)
                    .await?;
                Ok::<_, CardError>((flag, card_tags(&card)))
            })
            .await
    }

    pub async fn board_view(&self, board_id: &str) -> CardResult<BoardView> {
        self.cache
            .get_or_load(CacheKey::BoardView(board_id.to_string()), || async move {
                let view = self.engine.board_view(board_id).await?;
                let mut tags = HashSet::from([Tag::Board(board_id.to_string())]);
                for stage_view in &view.stages {
                    tags.insert(Tag::Stage(stage_view.stage.id.clone()));
                    tags.extend(stage_view.cards.iter().flat_map(card_tags));
                }
                debug!(board_id, tags = tags.len(), "built board view");
                Ok::<_, CardError>((view, tags))
            })
            .await
    }
}

/// The ids a change to `card` can make stale: itself, where it sits, and
/// its parent's child list.
fn card_tags(card: &Card) -> HashSet<Tag> {
    let mut tags = HashSet::from([
        Tag::Card(card.id.clone()),
        Tag::Stage(card.stage_id.clone()),
        Tag::Board(card.board_id.clone()),
    ]);
    if let Some(parent_id) = &card.parent_id {
        tags.insert(Tag::Card(parent_id.clone()));
    }
    tags
}

fn modified_tags(modified: &Modified) -> HashSet<Tag> {
    let mut tags = card_tags(&modified.card);
    tags.extend(card_tags(&modified.origin));
    tags
}
