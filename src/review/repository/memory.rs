//! In-memory implementation of `ContributionRepository`.
//!
//! All state is held in memory and lost on restart. Used in tests and for
//! local runs without a state directory.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{CasOutcome, CoinInfo, ContributionRepository, RepositoryError, UserAccount};
use crate::review::state::{Contribution, ContributionId, ContributionStatus, UserId};

#[derive(Default)]
struct Inner {
    contributions: HashMap<ContributionId, Contribution>,
    /// Credits that have been applied, keyed by contribution id.
    applied_credits: HashSet<ContributionId>,
    users: HashMap<UserId, UserAccount>,
    coins: HashMap<String, CoinInfo>,
    coin_contributors: HashMap<String, HashSet<UserId>>,
}

/// In-memory repository behind a single `RwLock`.
///
/// Holding the write lock across check-and-replace gives the same
/// serialization guarantee the SQLite backend gets from conditional
/// UPDATEs.
pub struct InMemoryRepository {
    inner: RwLock<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(mut records: Vec<Contribution>) -> Vec<Contribution> {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    records
}

#[async_trait]
impl ContributionRepository for InMemoryRepository {
    async fn insert(&self, contribution: &Contribution) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        if inner.contributions.contains_key(&contribution.id) {
            return Err(RepositoryError::storage(
                "insert contribution",
                format!("duplicate id {}", contribution.id),
            ));
        }
        inner
            .contributions
            .insert(contribution.id, contribution.clone());
        Ok(())
    }

    async fn get(&self, id: &ContributionId) -> Result<Option<Contribution>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.contributions.get(id).cloned())
    }

    async fn list_by_submitter(
        &self,
        submitter: &UserId,
    ) -> Result<Vec<Contribution>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(newest_first(
            inner
                .contributions
                .values()
                .filter(|c| &c.submitter_id == submitter)
                .cloned()
                .collect(),
        ))
    }

    async fn list_pending(&self) -> Result<Vec<Contribution>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(newest_first(
            inner
                .contributions
                .values()
                .filter(|c| {
                    matches!(
                        c.status,
                        ContributionStatus::Pending | ContributionStatus::UnderReview
                    )
                })
                .cloned()
                .collect(),
        ))
    }

    async fn list_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: Option<ContributionStatus>,
    ) -> Result<Vec<Contribution>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(newest_first(
            inner
                .contributions
                .values()
                .filter(|c| c.created_at >= start && c.created_at <= end)
                .filter(|c| status.is_none_or(|s| c.status == s))
                .cloned()
                .collect(),
        ))
    }

    async fn transaction_hash_exists(&self, hash: &str) -> Result<bool, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .contributions
            .values()
            .any(|c| c.transaction_hash.as_deref() == Some(hash)))
    }

    async fn compare_and_swap(
        &self,
        id: &ContributionId,
        expected: ContributionStatus,
        updated: &Contribution,
    ) -> Result<CasOutcome, RepositoryError> {
        let mut inner = self.inner.write().await;
        match inner.contributions.get(id) {
            None => Ok(CasOutcome::Conflict { actual: None }),
            Some(current) if current.status != expected => Ok(CasOutcome::Conflict {
                actual: Some(current.status),
            }),
            Some(_) => {
                inner.contributions.insert(*id, updated.clone());
                Ok(CasOutcome::Applied)
            }
        }
    }

    async fn apply_point_credit(
        &self,
        id: &ContributionId,
        user: &UserId,
        points: i64,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.write().await;
        if !inner.applied_credits.insert(*id) {
            return Ok(false);
        }
        let account = inner
            .users
            .entry(user.clone())
            .or_insert_with(|| UserAccount::new(user.clone()));
        account.points += points;
        account.approved_contributions += 1;
        if account.points > 0 {
            account.voting_rights = true;
        }
        Ok(true)
    }

    async fn point_credit_applied(&self, id: &ContributionId) -> Result<bool, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.applied_credits.contains(id))
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<UserAccount>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(id).cloned())
    }

    async fn record_submission_for_user(&self, id: &UserId) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        let account = inner
            .users
            .entry(id.clone())
            .or_insert_with(|| UserAccount::new(id.clone()));
        account.total_contributions += 1;
        Ok(())
    }

    async fn record_rejection_for_user(&self, id: &UserId) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        let account = inner
            .users
            .entry(id.clone())
            .or_insert_with(|| UserAccount::new(id.clone()));
        account.rejected_contributions += 1;
        Ok(())
    }

    async fn get_coin(&self, symbol: &str) -> Result<Option<CoinInfo>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.coins.get(symbol).cloned())
    }

    async fn upsert_coin(&self, coin: &CoinInfo) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        match inner.coins.get_mut(&coin.symbol) {
            Some(existing) => {
                let stats = existing.stats.clone();
                *existing = coin.clone();
                existing.stats = stats;
            }
            None => {
                inner.coins.insert(coin.symbol.clone(), coin.clone());
            }
        }
        Ok(())
    }

    async fn record_coin_approval(
        &self,
        symbol: &str,
        contributor: &UserId,
        amount: f64,
        points: i64,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        let newly_seen = inner
            .coin_contributors
            .entry(symbol.to_string())
            .or_default()
            .insert(contributor.clone());
        let Some(coin) = inner.coins.get_mut(symbol) else {
            return Err(RepositoryError::storage(
                "record coin approval",
                format!("unknown coin {}", symbol),
            ));
        };
        coin.stats.total_contributions += 1;
        coin.stats.total_amount += amount;
        coin.stats.total_points_awarded += points;
        if newly_seen {
            coin.stats.unique_contributors += 1;
        }
        Ok(())
    }
}
