//! Review store: the only component permitted to create contribution
//! records and move them through the review lifecycle.
//!
//! Each mutating call re-reads the persisted record, runs the pure
//! transition function on that snapshot, and writes the result back
//! conditionally on the status it was read at. Concurrent reviewers on
//! the same record are serialized by that compare-and-swap: the loser
//! observes the already-transitioned state and fails with an
//! invalid-transition error instead of corrupting history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::AppError;

use super::repository::{CasOutcome, ContributionRepository, UserAccount};
use super::state::{Contribution, ContributionId, ContributionStatus, NewContribution, UserId};
use super::transition::{transition, Effect, ReviewAction};

pub struct ReviewStore {
    repository: Arc<dyn ContributionRepository>,
}

impl ReviewStore {
    pub fn new(repository: Arc<dyn ContributionRepository>) -> Self {
        Self { repository }
    }

    /// Create a `pending` record from a validated submission.
    ///
    /// Field-level validation failures surface as `ValidationError`;
    /// a duplicate transaction hash is treated the same way.
    pub async fn submit(&self, new: NewContribution) -> Result<Contribution, AppError> {
        if let Some(hash) = new.transaction_hash.as_deref().filter(|h| !h.is_empty()) {
            if self.repository.transaction_hash_exists(hash).await? {
                return Err(AppError::Validation(format!(
                    "transaction hash {} is already recorded",
                    hash
                )));
            }
        }

        let record = Contribution::submitted(new, Utc::now()).map_err(AppError::Validation)?;
        self.repository.insert(&record).await?;
        self.repository
            .record_submission_for_user(&record.submitter_id)
            .await?;

        info!(
            contribution_id = %record.id,
            submitter = %record.submitter_id,
            amount = record.amount,
            coin = %record.coin_symbol,
            "contribution submitted"
        );
        Ok(record)
    }

    pub async fn get(&self, id: &ContributionId) -> Result<Contribution, AppError> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    pub async fn list_by_submitter(
        &self,
        submitter: &UserId,
    ) -> Result<Vec<Contribution>, AppError> {
        Ok(self.repository.list_by_submitter(submitter).await?)
    }

    /// The review queue: pending and under-review records, newest first.
    pub async fn list_pending(&self) -> Result<Vec<Contribution>, AppError> {
        Ok(self.repository.list_pending().await?)
    }

    pub async fn list_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: Option<ContributionStatus>,
    ) -> Result<Vec<Contribution>, AppError> {
        Ok(self
            .repository
            .list_by_date_range(start, end, status)
            .await?)
    }

    pub async fn get_user(&self, id: &UserId) -> Result<Option<UserAccount>, AppError> {
        Ok(self.repository.get_user(id).await?)
    }

    /// Whether the point credit for an approved contribution has landed.
    /// False means the credit is pending reconciliation.
    pub async fn point_credit_applied(&self, id: &ContributionId) -> Result<bool, AppError> {
        Ok(self.repository.point_credit_applied(id).await?)
    }

    pub async fn approve(
        &self,
        id: &ContributionId,
        reviewer: UserId,
        notes: Option<String>,
    ) -> Result<Contribution, AppError> {
        self.apply(id, ReviewAction::Approve, reviewer, notes).await
    }

    pub async fn reject(
        &self,
        id: &ContributionId,
        reviewer: UserId,
        notes: Option<String>,
    ) -> Result<Contribution, AppError> {
        self.apply(id, ReviewAction::Reject, reviewer, notes).await
    }

    pub async fn put_under_review(
        &self,
        id: &ContributionId,
        reviewer: UserId,
        notes: Option<String>,
    ) -> Result<Contribution, AppError> {
        self.apply(id, ReviewAction::PutUnderReview, reviewer, notes)
            .await
    }

    /// Re-read, transition, conditionally write, then run side effects.
    async fn apply(
        &self,
        id: &ContributionId,
        action: ReviewAction,
        reviewer: UserId,
        notes: Option<String>,
    ) -> Result<Contribution, AppError> {
        let snapshot = self.get(id).await?;
        let read_status = snapshot.status;

        let result = transition(snapshot, action, reviewer, notes, Utc::now()).map_err(|from| {
            AppError::InvalidTransition { action, from }
        })?;

        match self
            .repository
            .compare_and_swap(id, read_status, &result.contribution)
            .await?
        {
            CasOutcome::Applied => {}
            CasOutcome::Conflict {
                actual: Some(actual),
            } => {
                // Another reviewer won between our read and our write.
                info!(
                    contribution_id = %id,
                    action = %action,
                    actual = %actual,
                    "transition lost compare-and-swap"
                );
                return Err(AppError::InvalidTransition {
                    action,
                    from: actual,
                });
            }
            CasOutcome::Conflict { actual: None } => {
                return Err(AppError::NotFound(id.to_string()));
            }
        }

        info!(
            contribution_id = %id,
            action = %action,
            from = %read_status,
            to = %result.contribution.status,
            "contribution transitioned"
        );

        self.execute_effects(&result.effects).await?;

        Ok(result.contribution)
    }

    /// Execute the side effects the transition produced.
    ///
    /// The point credit is idempotent (keyed by contribution id) and
    /// retried once; a persistent failure leaves the contribution in its
    /// new state with the credit flagged unapplied for reconciliation.
    async fn execute_effects(&self, effects: &[Effect]) -> Result<(), AppError> {
        for effect in effects {
            match effect {
                Effect::CreditPoints {
                    contribution_id,
                    user_id,
                    points,
                } => {
                    let first = self
                        .repository
                        .apply_point_credit(contribution_id, user_id, *points)
                        .await;
                    let applied = match first {
                        Ok(applied) => applied,
                        Err(e) => {
                            warn!(
                                contribution_id = %contribution_id,
                                error = %e,
                                "point credit failed, retrying once"
                            );
                            self.repository
                                .apply_point_credit(contribution_id, user_id, *points)
                                .await
                                .map_err(|e| {
                                    error!(
                                        contribution_id = %contribution_id,
                                        error = %e,
                                        "point credit failed after retry; left for reconciliation"
                                    );
                                    e
                                })?
                        }
                    };
                    if !applied {
                        // A previous attempt already credited this
                        // contribution; nothing to do.
                        info!(
                            contribution_id = %contribution_id,
                            "point credit already applied"
                        );
                    }
                }
                Effect::RecordCoinApproval {
                    coin_symbol,
                    contributor,
                    amount,
                    points,
                } => {
                    self.repository
                        .record_coin_approval(coin_symbol, contributor, *amount, *points)
                        .await?;
                }
                Effect::RecordRejection { user_id } => {
                    self.repository.record_rejection_for_user(user_id).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::repository::{CoinInfo, InMemoryRepository};
    use crate::review::state::ReceiptMeta;

    fn receipt() -> ReceiptMeta {
        ReceiptMeta {
            filename: "r.jpg".to_string(),
            original_name: "photo.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            size: 4096,
            path: "receipts/r.jpg".to_string(),
            uploaded_at: Utc::now(),
        }
    }

    fn submission(submitter: &str, amount: f64, rate: f64) -> NewContribution {
        NewContribution {
            submitter_id: UserId::from(submitter),
            coin_symbol: "DOT".to_string(),
            amount,
            wallet_address: "wallet".to_string(),
            receipt: receipt(),
            transaction_hash: None,
            conversion_rate: rate,
            user_notes: None,
        }
    }

    async fn store_with_coin() -> ReviewStore {
        let repo = Arc::new(InMemoryRepository::new());
        repo.upsert_coin(&CoinInfo {
            symbol: "DOT".to_string(),
            name: "Polkadot".to_string(),
            wallet_info: None,
            conversion_rate: 2.0,
            is_active: true,
            stats: Default::default(),
        })
        .await
        .unwrap();
        ReviewStore::new(repo)
    }

    #[tokio::test]
    async fn test_submit_creates_pending_record() {
        let store = store_with_coin().await;
        let record = store.submit(submission("alice", 100.0, 2.0)).await.unwrap();

        assert_eq!(record.status, ContributionStatus::Pending);
        assert_eq!(record.history.len(), 1);

        let account = store.get_user(&UserId::from("alice")).await.unwrap().unwrap();
        assert_eq!(account.total_contributions, 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_duplicate_transaction_hash() {
        let store = store_with_coin().await;
        let mut first = submission("alice", 100.0, 2.0);
        first.transaction_hash = Some("0xsame".to_string());
        store.submit(first).await.unwrap();

        let mut second = submission("bob", 80.0, 2.0);
        second.transaction_hash = Some("0xsame".to_string());
        let err = store.submit(second).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_submit_validation_error() {
        let store = store_with_coin().await;
        let err = store
            .submit(submission("alice", -1.0, 2.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = store_with_coin().await;
        let err = store.get(&ContributionId::generate()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_full_review_round_trip() {
        let store = store_with_coin().await;
        let record = store.submit(submission("alice", 133.7, 2.0)).await.unwrap();

        store
            .put_under_review(&record.id, UserId::from("mod"), None)
            .await
            .unwrap();
        let approved = store
            .approve(&record.id, UserId::from("admin"), Some("verified".to_string()))
            .await
            .unwrap();

        assert_eq!(approved.status, ContributionStatus::Approved);
        assert_eq!(approved.points_awarded, 267);
        assert_eq!(approved.history.len(), 3);
        assert_eq!(
            approved.history[1].previous_status,
            Some(ContributionStatus::Pending)
        );
        assert_eq!(
            approved.history[2].previous_status,
            Some(ContributionStatus::UnderReview)
        );

        // side effects landed exactly once
        assert!(store.point_credit_applied(&record.id).await.unwrap());
        let account = store.get_user(&UserId::from("alice")).await.unwrap().unwrap();
        assert_eq!(account.points, 267);
        assert_eq!(account.approved_contributions, 1);
        assert!(account.voting_rights);
    }

    #[tokio::test]
    async fn test_second_approve_fails_and_history_is_unchanged() {
        let store = store_with_coin().await;
        let record = store.submit(submission("alice", 50.0, 1.0)).await.unwrap();

        store
            .approve(&record.id, UserId::from("admin"), None)
            .await
            .unwrap();
        let err = store
            .approve(&record.id, UserId::from("admin"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: ContributionStatus::Approved,
                ..
            }
        ));

        let persisted = store.get(&record.id).await.unwrap();
        assert_eq!(persisted.history.len(), 2);

        // points were credited once, not twice
        let account = store.get_user(&UserId::from("alice")).await.unwrap().unwrap();
        assert_eq!(account.points, 50);
    }

    #[tokio::test]
    async fn test_reject_credits_nothing() {
        let store = store_with_coin().await;
        let record = store.submit(submission("alice", 90.0, 2.0)).await.unwrap();

        let rejected = store
            .reject(&record.id, UserId::from("admin"), Some("no receipt".to_string()))
            .await
            .unwrap();
        assert_eq!(rejected.status, ContributionStatus::Rejected);
        assert_eq!(rejected.points_awarded, 0);

        let account = store.get_user(&UserId::from("alice")).await.unwrap().unwrap();
        assert_eq!(account.points, 0);
        assert_eq!(account.rejected_contributions, 1);
        assert!(!store.point_credit_applied(&record.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_under_review_only_from_pending() {
        let store = store_with_coin().await;
        let record = store.submit(submission("alice", 90.0, 2.0)).await.unwrap();

        store
            .put_under_review(&record.id, UserId::from("mod"), None)
            .await
            .unwrap();
        let err = store
            .put_under_review(&record.id, UserId::from("mod"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: ContributionStatus::UnderReview,
                ..
            }
        ));
    }

    /// Two reviewers race on the same freshly pending record: exactly one
    /// transition wins, the loser observes the new state, and the
    /// persisted status matches the winner's action.
    #[tokio::test]
    async fn test_concurrent_approve_and_reject_single_winner() {
        let store = Arc::new(store_with_coin().await);
        let record = store.submit(submission("alice", 100.0, 2.0)).await.unwrap();

        let approver = {
            let store = store.clone();
            let id = record.id;
            tokio::spawn(async move { store.approve(&id, UserId::from("admin-a"), None).await })
        };
        let rejecter = {
            let store = store.clone();
            let id = record.id;
            tokio::spawn(async move { store.reject(&id, UserId::from("admin-b"), None).await })
        };

        let approve_result = approver.await.unwrap();
        let reject_result = rejecter.await.unwrap();

        assert_ne!(
            approve_result.is_ok(),
            reject_result.is_ok(),
            "exactly one transition must win"
        );

        let persisted = store.get(&record.id).await.unwrap();
        assert_eq!(persisted.history.len(), 2);
        match (&approve_result, &reject_result) {
            (Ok(_), Err(e)) => {
                assert_eq!(persisted.status, ContributionStatus::Approved);
                assert!(matches!(e, AppError::InvalidTransition { .. }));
            }
            (Err(e), Ok(_)) => {
                assert_eq!(persisted.status, ContributionStatus::Rejected);
                assert!(matches!(e, AppError::InvalidTransition { .. }));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_list_pending_excludes_terminal() {
        let store = store_with_coin().await;
        let a = store.submit(submission("alice", 60.0, 1.0)).await.unwrap();
        let b = store.submit(submission("bob", 70.0, 1.0)).await.unwrap();
        store
            .put_under_review(&b.id, UserId::from("mod"), None)
            .await
            .unwrap();
        store
            .approve(&a.id, UserId::from("admin"), None)
            .await
            .unwrap();

        let queue = store.list_pending().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, b.id);
    }
}
