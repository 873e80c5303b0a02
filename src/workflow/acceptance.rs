use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::models::{AcceptanceCriterion, CriterionStatus};
use crate::errors::{CardResult, ValidationRule};

/// Storage of acceptance criteria attached to cards.
#[async_trait]
pub trait CriteriaStore: Send + Sync {
    async fn find_criteria_by_card_id(&self, card_id: &str) -> Result<Vec<AcceptanceCriterion>>;

    async fn add_criterion(
        &self,
        author: &str,
        card_id: &str,
        summary: &str,
    ) -> Result<AcceptanceCriterion>;

    async fn update_criterion(
        &self,
        id: &str,
        finished: bool,
        status: CriterionStatus,
    ) -> Result<Option<AcceptanceCriterion>>;
}

/// Answers whether a card's acceptance criteria allow it into a done stage.
#[derive(Clone)]
pub struct AcceptanceGate {
    store: Arc<dyn CriteriaStore>,
}

impl AcceptanceGate {
    pub fn new(store: Arc<dyn CriteriaStore>) -> Self {
        Self { store }
    }

    pub async fn has_any(&self, card_id: &str) -> CardResult<bool> {
        Ok(!self.store.find_criteria_by_card_id(card_id).await?.is_empty())
    }

    pub async fn all_completed(&self, card_id: &str) -> CardResult<bool> {
        let criteria = self.store.find_criteria_by_card_id(card_id).await?;
        Ok(criteria.iter().all(|c| c.finished))
    }

    pub async fn exists_with_status(
        &self,
        card_id: &str,
        status: CriterionStatus,
    ) -> CardResult<bool> {
        let criteria = self.store.find_criteria_by_card_id(card_id).await?;
        Ok(criteria.iter().any(|c| c.status == status))
    }

    /// Runs the done-stage checks in their fixed order and reports the
    /// first one that fails.
    pub async fn verify_ready_for_done(&self, card_id: &str) -> CardResult<()> {
        if !self.has_any(card_id).await? {
            return Err(ValidationRule::AcceptanceCriteriaNotSet.into());
        }
        if !self.all_completed(card_id).await? {
            return Err(ValidationRule::AcceptanceCriteriaNotCompleted.into());
        }
        if self
            .exists_with_status(card_id, CriterionStatus::Unverified)
            .await?
        {
            return Err(ValidationRule::UnverifiedCriteriaExist.into());
        }
        if self
            .exists_with_status(card_id, CriterionStatus::Unpassed)
            .await?
        {
            return Err(ValidationRule::UnpassedCriteriaExist.into());
        }
        Ok(())
    }

    pub async fn find_by_card_id(&self, card_id: &str) -> CardResult<Vec<AcceptanceCriterion>> {
        Ok(self.store.find_criteria_by_card_id(card_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory criteria for exercising the gate order without SQLite.
    #[derive(Default)]
    struct FakeCriteria {
        items: Mutex<Vec<AcceptanceCriterion>>,
    }

    impl FakeCriteria {
        fn with(items: &[(bool, CriterionStatus)]) -> Arc<Self> {
            let items = items
                .iter()
                .enumerate()
                .map(|(i, (finished, status))| AcceptanceCriterion {
                    id: format!("ac-{i}"),
                    card_id: "card".into(),
                    summary: format!("criterion {i}"),
                    finished: *finished,
                    status: *status,
                    sort_number: i as i64,
                    author: "alice".into(),
                    created_at: String::new(),
                })
                .collect();
            Arc::new(Self {
                items: Mutex::new(items),
            })
        }
    }

    #[async_trait]
    impl CriteriaStore for FakeCriteria {
        async fn find_criteria_by_card_id(
            &self,
            card_id: &str,
        ) -> Result<Vec<AcceptanceCriterion>> {
            let items = self.items.lock().unwrap();
            Ok(items.iter().filter(|c| c.card_id == card_id).cloned().collect())
        }

        async fn add_criterion(
            &self,
            _author: &str,
            _card_id: &str,
            _summary: &str,
        ) -> Result<AcceptanceCriterion> {
            anyhow::bail!("not supported by the fake")
        }

        async fn update_criterion(
            &self,
            _id: &str,
            _finished: bool,
            _status: CriterionStatus,
        ) -> Result<Option<AcceptanceCriterion>> {
            anyhow::bail!("not supported by the fake")
        }
    }

    async fn verdict(items: &[(bool, CriterionStatus)]) -> Option<ValidationRule> {
        let gate = AcceptanceGate::new(FakeCriteria::with(items));
        gate.verify_ready_for_done("card").await.err().and_then(|e| e.rule())
    }

    #[tokio::test]
    async fn test_no_criteria_is_rejected_first() {
        assert_eq!(
            verdict(&[]).await,
            Some(ValidationRule::AcceptanceCriteriaNotSet)
        );
    }

    #[tokio::test]
    async fn test_unfinished_beats_unverified() {
        let items = [
            (false, CriterionStatus::Unverified),
            (true, CriterionStatus::Unpassed),
        ];
        assert_eq!(
            verdict(&items).await,
            Some(ValidationRule::AcceptanceCriteriaNotCompleted)
        );
    }

    #[tokio::test]
    async fn test_unverified_beats_unpassed() {
        let items = [
            (true, CriterionStatus::Unpassed),
            (true, CriterionStatus::Unverified),
        ];
        assert_eq!(
            verdict(&items).await,
            Some(ValidationRule::UnverifiedCriteriaExist)
        );
    }

    #[tokio::test]
    async fn test_unpassed_is_reported() {
        let items = [
            (true, CriterionStatus::Passed),
            (true, CriterionStatus::Unpassed),
        ];
        assert_eq!(
            verdict(&items).await,
            Some(ValidationRule::UnpassedCriteriaExist)
        );
    }

    #[tokio::test]
    async fn test_all_passed_opens_the_gate() {
        let items = [
            (true, CriterionStatus::Passed),
            (true, CriterionStatus::Passed),
        ];
        assert_eq!(verdict(&items).await, None);
    }
}
