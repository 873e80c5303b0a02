//! Typed error hierarchy for the card workflow.
//!
//! `CardError` has three arms:
//! - `Validation`: a business rule rejected the request; safe to show users
//! - `NotFound`: a referenced card, stage or board does not exist
//! - `Storage`: a collaborator failed; propagated unchanged

use thiserror::Error;

/// Business rules the workflow engine enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationRule {
    #[error("The stage of the card is not specified.")]
    StageNotSpecified,

    #[error("Cards can only be created in a todo stage.")]
    StageNotTodo,

    #[error("The stage has reached its WIP limit.")]
    WipLimitReached,

    #[error("The card is archived or already done.")]
    CardArchivedOrDone,

    #[error("Cards cannot be moved into an archived stage.")]
    TargetStageArchived,

    #[error("A deadline must be set before the card enters an in-process stage.")]
    DeadlineNotSet,

    #[error("The card has no acceptance criteria.")]
    AcceptanceCriteriaNotSet,

    #[error("Not all acceptance criteria are completed.")]
    AcceptanceCriteriaNotCompleted,

    #[error("Some acceptance criteria are still unverified.")]
    UnverifiedCriteriaExist,

    #[error("Some acceptance criteria did not pass.")]
    UnpassedCriteriaExist,

    #[error("The card already has child cards and cannot get a parent.")]
    HasChildCard,

    #[error("The parent card is archived or already done.")]
    ParentArchivedOrDone,

    #[error("A card cannot be its own parent.")]
    CannotParentItself,
}

impl ValidationRule {
    /// Stable machine-readable code for API and CLI consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StageNotSpecified => "STAGE_IS_NOT_SPECIFIED",
            Self::StageNotTodo => "STAGE_IS_NOT_TODO_STATUS",
            Self::WipLimitReached => "STAGE_WIP_REACHED_LIMIT",
            Self::CardArchivedOrDone => "CARD_IS_ARCHIVED_OR_IN_DONE_STATUS",
            Self::TargetStageArchived => "TARGET_STAGE_IS_ARCHIVED",
            Self::DeadlineNotSet => "DEADLINE_IS_NOT_SET",
            Self::AcceptanceCriteriaNotSet => "ACCEPTANCE_CRITERIA_IS_NOT_SET",
            Self::AcceptanceCriteriaNotCompleted => "ACCEPTANCE_CRITERIA_IS_NOT_COMPLETED",
            Self::UnverifiedCriteriaExist => "UNVERIFIED_ACCEPTANCE_CRITERIA_EXISTS",
            Self::UnpassedCriteriaExist => "UNPASSED_ACCEPTANCE_CRITERIA_EXISTS",
            Self::HasChildCard => "HAS_CHILD_CARD",
            Self::ParentArchivedOrDone => "PARENT_CARD_IS_ARCHIVED_OR_IN_DONE_STATUS",
            Self::CannotParentItself => "CARD_CANNOT_BE_ITS_OWN_PARENT",
        }
    }
}

/// Entities that can be reported missing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Missing {
    #[error("Card {id} not found")]
    Card { id: String },

    #[error("Parent card {id} not found")]
    ParentCard { id: String },

    #[error("Stage {id} not found")]
    Stage { id: String },

    #[error("Board {id} not found")]
    Board { id: String },
}

impl Missing {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Card { .. } => "CARD_IS_NOT_EXISTS",
            Self::ParentCard { .. } => "PARENT_CARD_IS_NOT_FOUND",
            Self::Stage { .. } => "STAGE_IS_NOT_EXISTS",
            Self::Board { .. } => "BOARD_IS_NOT_EXISTS",
        }
    }
}

#[derive(Debug, Error)]
pub enum CardError {
    #[error("{0}")]
    Validation(#[from] ValidationRule),

    #[error("{0}")]
    NotFound(#[from] Missing),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl CardError {
    pub fn card_not_found(id: impl Into<String>) -> Self {
        Missing::Card { id: id.into() }.into()
    }

    pub fn stage_not_found(id: impl Into<String>) -> Self {
        Missing::Stage { id: id.into() }.into()
    }

    /// The violated rule, if this is a validation failure.
    pub fn rule(&self) -> Option<ValidationRule> {
        match self {
            Self::Validation(rule) => Some(*rule),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(rule) => rule.code(),
            Self::NotFound(missing) => missing.code(),
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

pub type CardResult<T> = std::result::Result<T, CardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_is_matchable_by_rule() {
        let err: CardError = ValidationRule::WipLimitReached.into();
        match &err {
            CardError::Validation(ValidationRule::WipLimitReached) => {}
            _ => panic!("Expected WipLimitReached"),
        }
        assert_eq!(err.rule(), Some(ValidationRule::WipLimitReached));
        assert_eq!(err.code(), "STAGE_WIP_REACHED_LIMIT");
    }

    #[test]
    fn not_found_carries_id() {
        let err = CardError::card_not_found("card-42");
        match &err {
            CardError::NotFound(Missing::Card { id }) => assert_eq!(id, "card-42"),
            _ => panic!("Expected NotFound(Card)"),
        }
        assert!(err.to_string().contains("card-42"));
        assert_eq!(err.rule(), None);
    }

    #[test]
    fn storage_error_converts_from_anyhow() {
        let err: CardError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, CardError::Storage(_)));
        assert_eq!(err.code(), "STORAGE_ERROR");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn rule_codes_are_distinct() {
        let rules = [
            ValidationRule::StageNotSpecified,
            ValidationRule::StageNotTodo,
            ValidationRule::WipLimitReached,
            ValidationRule::CardArchivedOrDone,
            ValidationRule::TargetStageArchived,
            ValidationRule::DeadlineNotSet,
            ValidationRule::AcceptanceCriteriaNotSet,
            ValidationRule::AcceptanceCriteriaNotCompleted,
            ValidationRule::UnverifiedCriteriaExist,
            ValidationRule::UnpassedCriteriaExist,
            ValidationRule::HasChildCard,
            ValidationRule::ParentArchivedOrDone,
            ValidationRule::CannotParentItself,
        ];
        let mut codes: Vec<_> = rules.iter().map(|r| r.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), rules.len());
    }

    #[test]
    fn card_error_implements_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CardError::from(ValidationRule::HasChildCard));
        assert_std_error(&CardError::stage_not_found("s1"));
    }
}
