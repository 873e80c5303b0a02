use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Board {
    pub id: String,
    pub name: String,
    pub code_prefix: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Todo,
    InProcess,
    Done,
    Archived,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProcess => "in_process",
            Self::Done => "done",
            Self::Archived => "archived",
        }
    }

    pub fn is_done_or_archived(&self) -> bool {
        matches!(self, Self::Done | Self::Archived)
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_process" | "in-process" => Ok(Self::InProcess),
            "done" => Ok(Self::Done),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid stage status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub id: String,
    pub board_id: String,
    pub title: String,
    pub status: StageStatus,
    pub wip_limit: Option<u32>,
    pub sort_number: i64,
}

impl Stage {
    pub fn is_todo(&self) -> bool {
        self.status == StageStatus::Todo
    }

    pub fn is_in_process(&self) -> bool {
        self.status == StageStatus::InProcess
    }

    pub fn is_done(&self) -> bool {
        self.status == StageStatus::Done
    }

    pub fn is_archived(&self) -> bool {
        self.status == StageStatus::Archived
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Card {
    pub id: String,
    pub board_id: String,
    pub code: Option<String>,
    pub title: String,
    pub content: Option<String>,
    pub stage_id: String,
    pub parent_id: Option<String>,
    pub sort_number: i64,
    pub deadline: Option<DateTime<Utc>>,
    pub author: String,
    pub created_at: String,
    pub modified_at: String,
}

impl Card {
    pub fn has_code(&self) -> bool {
        self.code.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Caller input for `create_card`. The stage is optional here so the
/// engine can reject a missing one with a proper validation error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCard {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub stage_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub sort_number: Option<i64>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

/// Fully resolved row handed to `CardStore::create`.
#[derive(Debug, Clone)]
pub struct CardRecord {
    pub board_id: String,
    pub code: String,
    pub period: String,
    pub title: String,
    pub content: Option<String>,
    pub stage_id: String,
    pub parent_id: Option<String>,
    /// Appended after the stage's last card when absent.
    pub sort_number: Option<i64>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Replacement values for `modify`. Descriptive fields, the parent and the
/// deadline replace the stored ones; `stage_id` and `sort_number` keep the
/// stored value when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardUpdate {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub stage_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub sort_number: Option<i64>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl CardUpdate {
    /// Seeds an update with the card's current values.
    pub fn from_card(card: &Card) -> Self {
        Self {
            title: card.title.clone(),
            content: card.content.clone(),
            stage_id: Some(card.stage_id.clone()),
            parent_id: card.parent_id.clone(),
            sort_number: Some(card.sort_number),
            deadline: card.deadline,
        }
    }

    pub fn moves_to_other_stage(&self, origin: &Card) -> bool {
        self.stage_id
            .as_deref()
            .is_some_and(|stage| stage != origin.stage_id)
    }

    pub fn moves_to_parent(&self, origin: &Card) -> bool {
        match self.parent_id.as_deref() {
            Some(parent) => origin.parent_id.as_deref() != Some(parent),
            None => false,
        }
    }
}

/// Values written by `CardStore::modify` after the engine resolved them.
#[derive(Debug, Clone)]
pub struct CardChanges {
    pub code: Option<String>,
    pub title: String,
    pub content: Option<String>,
    pub stage_id: String,
    pub parent_id: Option<String>,
    pub sort_number: i64,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardMove {
    pub id: String,
    pub stage_id: String,
    pub sort_number: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CriterionStatus {
    Unverified,
    Unpassed,
    Passed,
}

impl CriterionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Unpassed => "unpassed",
            Self::Passed => "passed",
        }
    }
}

impl FromStr for CriterionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unverified" => Ok(Self::Unverified),
            "unpassed" => Ok(Self::Unpassed),
            "passed" => Ok(Self::Passed),
            _ => Err(format!("Invalid acceptance criterion status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcceptanceCriterion {
    pub id: String,
    pub card_id: String,
    pub summary: String,
    pub finished: bool,
    pub status: CriterionStatus,
    pub sort_number: i64,
    pub author: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    CardCreated,
    CardModified,
    CardMoved,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardCreated => "card_created",
            Self::CardModified => "card_modified",
            Self::CardMoved => "card_moved",
        }
    }
}

impl FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card_created" => Ok(Self::CardCreated),
            "card_modified" => Ok(Self::CardModified),
            "card_moved" => Ok(Self::CardMoved),
            _ => Err(format!("Invalid activity kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub card_id: String,
    pub kind: ActivityKind,
    pub summary: String,
    pub detail: serde_json::Value,
    pub actor: String,
    pub created_at: String,
}

// Read-side view types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub board: Board,
    pub stages: Vec<StageView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageView {
    pub stage: Stage,
    pub cards: Vec<Card>,
}

/// Result of a mutation that replaced a card, keeping the pre-mutation
/// snapshot so callers can tell which stages and parents were affected.
#[derive(Debug, Clone)]
pub struct Modified {
    pub card: Card,
    pub origin: Card,
}

#[derive(Debug, Clone)]
pub struct MovedCards {
    /// Cards of the target stage after the batch applied.
    pub cards: Vec<Card>,
    /// Pre-move snapshots of every card the batch moved.
    pub origins: Vec<Card>,
}

#[derive(Debug, Clone)]
pub struct Deleted {
    /// Rows the store reported for the top-level card.
    pub count: usize,
    /// Every card removed, descendants first.
    pub removed: Vec<Card>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(stage: &str, parent: Option<&str>) -> Card {
        Card {
            id: "c1".into(),
            board_id: "b1".into(),
            code: None,
            title: "t".into(),
            content: None,
            stage_id: stage.into(),
            parent_id: parent.map(Into::into),
            sort_number: 0,
            deadline: None,
            author: "alice".into(),
            created_at: String::new(),
            modified_at: String::new(),
        }
    }

    #[test]
    fn test_stage_status_parses_both_spellings() {
        assert_eq!(
            StageStatus::from_str("in-process").unwrap(),
            StageStatus::InProcess
        );
        assert_eq!(
            StageStatus::from_str("in_process").unwrap(),
            StageStatus::InProcess
        );
        assert!(StageStatus::from_str("doing").is_err());
    }

    #[test]
    fn test_done_and_archived_are_terminal() {
        assert!(StageStatus::Done.is_done_or_archived());
        assert!(StageStatus::Archived.is_done_or_archived());
        assert!(!StageStatus::Todo.is_done_or_archived());
        assert!(!StageStatus::InProcess.is_done_or_archived());
    }

    #[test]
    fn test_update_without_stage_is_not_a_move() {
        let origin = card("s1", None);
        let mut update = CardUpdate::from_card(&origin);
        assert!(!update.moves_to_other_stage(&origin));
        update.stage_id = None;
        assert!(!update.moves_to_other_stage(&origin));
        update.stage_id = Some("s2".into());
        assert!(update.moves_to_other_stage(&origin));
    }

    #[test]
    fn test_clearing_parent_is_not_a_reparent() {
        let origin = card("s1", Some("p1"));
        let mut update = CardUpdate::from_card(&origin);
        assert!(!update.moves_to_parent(&origin));
        update.parent_id = None;
        assert!(!update.moves_to_parent(&origin));
        update.parent_id = Some("p2".into());
        assert!(update.moves_to_parent(&origin));
    }

    #[test]
    fn test_empty_code_counts_as_missing() {
        let mut c = card("s1", None);
        assert!(!c.has_code());
        c.code = Some(String::new());
        assert!(!c.has_code());
        c.code = Some("KB-160101".into());
        assert!(c.has_code());
    }
}
