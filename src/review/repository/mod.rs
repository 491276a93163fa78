//! Repository abstraction for contribution persistence.
//!
//! This module defines the `ContributionRepository` trait that abstracts
//! storage for contribution records, the idempotent point-credit ledger,
//! and the user/coin aggregates the review store maintains.
//! Implementations provide different backends (in-memory, SQLite).

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::{Contribution, ContributionId, ContributionStatus, UserId};

/// Storage-layer failure. Not surfaced verbatim to HTTP callers; the
/// service logs it and returns a generic 500.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage failure during {operation}: {message}")]
    Storage { operation: String, message: String },
    #[error("corrupt record for {context}: {message}")]
    Corrupt { context: String, message: String },
}

impl RepositoryError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn corrupt(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a conditional status write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The record was written; the expected status matched.
    Applied,
    /// Another transition won the race. Carries the status actually
    /// persisted at the time of the attempt, or None if the record is gone.
    Conflict {
        actual: Option<ContributionStatus>,
    },
}

/// A user account as the review store sees it: point balance, voting
/// rights, and contribution counters. Owned by the external user
/// management system; mutated only through review side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: UserId,
    pub points: i64,
    pub voting_rights: bool,
    pub total_contributions: i64,
    pub approved_contributions: i64,
    pub rejected_contributions: i64,
}

impl UserAccount {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            points: 0,
            voting_rights: false,
            total_contributions: 0,
            approved_contributions: 0,
            rejected_contributions: 0,
        }
    }
}

/// Aggregate statistics for a coin, updated on approval.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinStats {
    pub total_contributions: i64,
    pub total_amount: f64,
    pub unique_contributors: i64,
    pub total_points_awarded: i64,
}

/// A registered coin: symbol, conversion rate, active flag, aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinInfo {
    pub symbol: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_info: Option<String>,
    pub conversion_rate: f64,
    pub is_active: bool,
    #[serde(default)]
    pub stats: CoinStats,
}

/// Persistence port for the review store.
///
/// Implementations must make `compare_and_swap` and `apply_point_credit`
/// atomic with respect to concurrent callers: the former is the per-record
/// serialization point for transitions, the latter is the idempotency
/// guarantee for point crediting.
#[async_trait]
pub trait ContributionRepository: Send + Sync {
    // -------------------------------------------------------------------
    // Contribution records
    // -------------------------------------------------------------------

    /// Insert a freshly submitted record. Fails if the id already exists.
    async fn insert(&self, contribution: &Contribution) -> Result<(), RepositoryError>;

    /// Fetch a record by id, None if unknown.
    async fn get(&self, id: &ContributionId) -> Result<Option<Contribution>, RepositoryError>;

    /// All records for a submitter, newest first.
    async fn list_by_submitter(
        &self,
        submitter: &UserId,
    ) -> Result<Vec<Contribution>, RepositoryError>;

    /// The review queue: records in Pending or UnderReview, newest first.
    async fn list_pending(&self) -> Result<Vec<Contribution>, RepositoryError>;

    /// Records created within `[start, end]`, optionally filtered by
    /// status, newest first.
    async fn list_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: Option<ContributionStatus>,
    ) -> Result<Vec<Contribution>, RepositoryError>;

    /// Whether a transaction hash is already recorded on any contribution.
    async fn transaction_hash_exists(&self, hash: &str) -> Result<bool, RepositoryError>;

    /// Write `updated` only if the persisted status still equals
    /// `expected`. This is the serialization point that makes concurrent
    /// transitions on one record lose cleanly instead of corrupting
    /// history.
    async fn compare_and_swap(
        &self,
        id: &ContributionId,
        expected: ContributionStatus,
        updated: &Contribution,
    ) -> Result<CasOutcome, RepositoryError>;

    // -------------------------------------------------------------------
    // Point-credit ledger
    // -------------------------------------------------------------------

    /// Credit `points` to `user` for `id` exactly once.
    ///
    /// Returns true if this call applied the credit, false if a previous
    /// call already had. Implementations must make the ledger claim and
    /// the balance increment a single atomic step.
    async fn apply_point_credit(
        &self,
        id: &ContributionId,
        user: &UserId,
        points: i64,
    ) -> Result<bool, RepositoryError>;

    /// Whether the credit for `id` has been applied. False for approved
    /// contributions whose credit is still pending reconciliation.
    async fn point_credit_applied(&self, id: &ContributionId) -> Result<bool, RepositoryError>;

    // -------------------------------------------------------------------
    // User aggregates
    // -------------------------------------------------------------------

    async fn get_user(&self, id: &UserId) -> Result<Option<UserAccount>, RepositoryError>;

    /// Bump the submitter's total-contribution counter at submission time.
    async fn record_submission_for_user(&self, id: &UserId) -> Result<(), RepositoryError>;

    /// Bump the submitter's rejected counter. No points involved.
    async fn record_rejection_for_user(&self, id: &UserId) -> Result<(), RepositoryError>;

    // -------------------------------------------------------------------
    // Coin registry
    // -------------------------------------------------------------------

    async fn get_coin(&self, symbol: &str) -> Result<Option<CoinInfo>, RepositoryError>;

    /// Insert or replace a coin definition (aggregates preserved by
    /// implementations on replace).
    async fn upsert_coin(&self, coin: &CoinInfo) -> Result<(), RepositoryError>;

    /// Fold an approved contribution into the coin's aggregates.
    async fn record_coin_approval(
        &self,
        symbol: &str,
        contributor: &UserId,
        amount: f64,
        points: i64,
    ) -> Result<(), RepositoryError>;
}
