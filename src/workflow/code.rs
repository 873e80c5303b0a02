//! Human-facing card codes: `prefix + yymm + sequence`.
//!
//! Counting the period's cards and inserting the new one are two storage
//! calls, so concurrent creations in the same board and month would read
//! the same count. `CodeGenerator::reserve` hands out a guard from a
//! per-(board, period) lock; callers hold it until the card carrying the
//! code is persisted and drop it before any further work. Locks of past
//! periods go away with their last reservation.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::locks::{KeyedGuard, KeyedLocks};
use super::ports::{BoardStore, CardStore};
use crate::errors::{CardResult, Missing};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|g| *g).unwrap_or_else(|e| *e.into_inner())
    }
}

/// Two-digit year followed by two-digit month, e.g. `1601`.
pub fn period_token(now: DateTime<Utc>) -> String {
    now.format("%y%m").to_string()
}

/// Formats the code for the card following `total` earlier ones.
///
/// The `"0"` pad is keyed on the earlier count, not on the sequence
/// number, so the eleventh card of a period reads `010`. Stored codes
/// already follow this shape.
pub fn format_code(prefix: &str, period: &str, total: u32) -> String {
    let sequence = total + 1;
    if total < 10 {
        format!("{}{}0{}", prefix, period, sequence)
    } else {
        format!("{}{}{}", prefix, period, sequence)
    }
}

/// A code together with the lock that keeps it unique until persisted.
pub struct CodeReservation {
    pub code: String,
    pub period: String,
    _guard: KeyedGuard,
}

impl std::fmt::Debug for CodeReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeReservation")
            .field("code", &self.code)
            .field("period", &self.period)
            .finish()
    }
}

pub struct CodeGenerator {
    boards: Arc<dyn BoardStore>,
    cards: Arc<dyn CardStore>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl CodeGenerator {
    pub fn new(
        boards: Arc<dyn BoardStore>,
        cards: Arc<dyn CardStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            boards,
            cards,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    pub fn current_period(&self) -> String {
        period_token(self.clock.now())
    }

    /// Computes the next code for `board_id` and keeps the board-month
    /// locked until the returned reservation is dropped.
    pub async fn reserve(&self, board_id: &str) -> CardResult<CodeReservation> {
        let board = self
            .boards
            .find_board(board_id)
            .await?
            .ok_or_else(|| Missing::Board {
                id: board_id.to_string(),
            })?;
        let period = self.current_period();

        let guard = self.locks.acquire(format!("{}/{}", board_id, period)).await;

        let total = self.cards.total_cards_created(board_id, &period).await?;
        Ok(CodeReservation {
            code: format_code(&board.code_prefix, &period, total),
            period,
            _guard: guard,
        })
    }

    /// Next code without holding the lock afterwards. Each call consumes a
    /// sequence number only once a card carrying it is stored.
    pub async fn generate_code(&self, board_id: &str) -> CardResult<String> {
        Ok(self.reserve(board_id).await?.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::workflow::db::{DbHandle, KanbanDb};
    use crate::workflow::engine::{CardWorkflow, Collaborators};
    use crate::workflow::models::{NewCard, StageStatus};

    #[test]
    fn test_period_token_is_year_month() {
        let now = Utc.with_ymd_and_hms(2016, 1, 15, 9, 30, 0).unwrap();
        assert_eq!(period_token(now), "1601");
        let now = Utc.with_ymd_and_hms(2024, 11, 1, 0, 0, 0).unwrap();
        assert_eq!(period_token(now), "2411");
    }

    #[test]
    fn test_format_code_pads_on_prior_count() {
        assert_eq!(format_code("KB-", "1601", 0), "KB-160101");
        assert_eq!(format_code("KB-", "1601", 1), "KB-160102");
        assert_eq!(format_code("KB-", "1601", 8), "KB-160109");
        assert_eq!(format_code("KB-", "1601", 9), "KB-1601010");
        assert_eq!(format_code("KB-", "1601", 10), "KB-160111");
        assert_eq!(format_code("KB-", "1601", 120), "KB-1601121");
    }

    #[test]
    fn test_fixed_clock_can_be_moved() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(period_token(clock.now()), "1601");
        clock.set(Utc.with_ymd_and_hms(2016, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(period_token(clock.now()), "1602");
    }

    fn seeded_board() -> (DbHandle, String, String) {
        let db = DbHandle::new(KanbanDb::new_in_memory().unwrap());
        let (board_id, stage_id) = {
            let guard = db.lock_sync().unwrap();
            let board = guard.create_board("Board", "KB-").unwrap();
            let stage = guard
                .create_stage(&board.id, "Todo", StageStatus::Todo, None)
                .unwrap();
            (board.id, stage.id)
        };
        (db, board_id, stage_id)
    }

    fn january() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2016, 1, 10, 0, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_generate_code_counts_cards_of_the_period() {
        let (db, board_id, stage_id) = seeded_board();
        let generator = CodeGenerator::new(Arc::new(db.clone()), Arc::new(db.clone()), january());

        assert_eq!(generator.generate_code(&board_id).await.unwrap(), "KB-160101");
        // Nothing was stored, so the same sequence is handed out again.
        assert_eq!(generator.generate_code(&board_id).await.unwrap(), "KB-160101");

        db.lock_sync()
            .unwrap()
            .import_card_in_period(&board_id, &stage_id, "Old", "1601")
            .unwrap();
        assert_eq!(generator.generate_code(&board_id).await.unwrap(), "KB-160102");
    }

    #[tokio::test]
    async fn test_released_reservations_leave_no_locks_behind() {
        let (db, board_id, _) = seeded_board();
        let clock = january();
        let generator = CodeGenerator::new(Arc::new(db.clone()), Arc::new(db), clock.clone());

        let reservation = generator.reserve(&board_id).await.unwrap();
        assert_eq!(generator.locks.len(), 1);
        drop(reservation);
        assert!(generator.locks.is_empty());

        clock.set(Utc.with_ymd_and_hms(2016, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(generator.generate_code(&board_id).await.unwrap(), "KB-160201");
        assert!(generator.locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creations_get_distinct_contiguous_codes() {
        let (db, board_id, stage_id) = seeded_board();
        let engine = Arc::new(CardWorkflow::new(Collaborators::sqlite(db, january())));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                let board_id = board_id.clone();
                let card = NewCard {
                    title: format!("Card {i}"),
                    stage_id: Some(stage_id.clone()),
                    ..Default::default()
                };
                tokio::spawn(async move { engine.create_card("alice", &board_id, card).await })
            })
            .collect();

        let mut codes = Vec::new();
        for task in tasks {
            let card = task.await.unwrap().unwrap();
            codes.push(card.code.unwrap());
        }
        codes.sort();

        let expected: Vec<String> = (0..8).map(|n| format_code("KB-", "1601", n)).collect();
        assert_eq!(codes, expected);
        assert!(engine.codes().locks.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_board_is_not_found() {
        let db = DbHandle::new(KanbanDb::new_in_memory().unwrap());
        let generator = CodeGenerator::new(
            Arc::new(db.clone()),
            Arc::new(db),
            Arc::new(SystemClock),
        );
        let err = generator.generate_code("missing").await.unwrap_err();
        assert_eq!(err.code(), "BOARD_IS_NOT_EXISTS");
    }
}
