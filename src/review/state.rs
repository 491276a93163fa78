//! Record types for the contribution review lifecycle.
//!
//! A contribution is created in `Pending` state and moves through the
//! review state machine via the pure transition function in
//! [`crate::review::transition`]. Every status change appends exactly one
//! history entry; the history vector is append-only.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype for contribution identifiers to prevent mixing with other ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContributionId(pub Uuid);

impl ContributionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ContributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for user/principal identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Review status of a contribution.
///
/// `Pending` is the creation state. `UnderReview` is reachable only from
/// `Pending`. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
}

impl ContributionStatus {
    /// Returns true if no further transitions are permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// Stable string form used in database columns and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse the stable string form back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "under_review" => Some(Self::UnderReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ContributionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Action recorded in a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Submitted,
    UnderReview,
    Approved,
    Rejected,
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// One immutable audit record of a status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub performed_by: UserId,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// None only for the initial `submitted` entry, where no previous
    /// status exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<ContributionStatus>,
    pub new_status: ContributionStatus,
}

/// Metadata describing a stored receipt file.
///
/// Produced by the receipt store collaborator; the review core stores and
/// echoes this structure but never inspects file content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptMeta {
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub path: String,
    pub uploaded_at: DateTime<Utc>,
}

impl ReceiptMeta {
    /// Returns true if all required fields are present and plausible.
    pub fn is_complete(&self) -> bool {
        !self.filename.is_empty()
            && !self.original_name.is_empty()
            && !self.mime_type.is_empty()
            && !self.path.is_empty()
            && self.size > 0
    }
}

/// A user-submitted claim of having transferred value, pending
/// administrative verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub id: ContributionId,
    pub submitter_id: UserId,
    pub coin_symbol: String,
    pub amount: f64,
    pub wallet_address: String,
    pub receipt: ReceiptMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    pub conversion_rate: f64,
    /// Non-zero only once the contribution is approved.
    pub points_awarded: i64,
    pub status: ContributionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
}

/// Fields supplied by the caller when submitting a contribution.
#[derive(Debug, Clone)]
pub struct NewContribution {
    pub submitter_id: UserId,
    pub coin_symbol: String,
    pub amount: f64,
    pub wallet_address: String,
    pub receipt: ReceiptMeta,
    pub transaction_hash: Option<String>,
    pub conversion_rate: f64,
    pub user_notes: Option<String>,
}

impl Contribution {
    /// Build a fresh `Pending` record from a validated submission.
    ///
    /// Returns a field-level validation message on bad input; the caller
    /// wraps it into the service error taxonomy.
    pub fn submitted(new: NewContribution, now: DateTime<Utc>) -> Result<Self, String> {
        if !new.amount.is_finite() || new.amount <= 0.0 {
            return Err("amount must be a positive number".to_string());
        }
        if new.coin_symbol.trim().is_empty() {
            return Err("currency symbol must not be empty".to_string());
        }
        if new.wallet_address.trim().is_empty() {
            return Err("wallet address must not be empty".to_string());
        }
        if !new.receipt.is_complete() {
            return Err("receipt metadata is incomplete".to_string());
        }
        if !new.conversion_rate.is_finite() || new.conversion_rate < 0.0 {
            return Err("conversion rate must be non-negative".to_string());
        }

        let submitter_id = new.submitter_id;
        let history = vec![HistoryEntry {
            action: HistoryAction::Submitted,
            performed_by: submitter_id.clone(),
            timestamp: now,
            notes: new.user_notes.clone(),
            previous_status: None,
            new_status: ContributionStatus::Pending,
        }];

        Ok(Self {
            id: ContributionId::generate(),
            submitter_id,
            coin_symbol: new.coin_symbol.trim().to_uppercase(),
            amount: new.amount,
            wallet_address: new.wallet_address,
            receipt: new.receipt,
            transaction_hash: new.transaction_hash.filter(|h| !h.trim().is_empty()),
            conversion_rate: new.conversion_rate,
            points_awarded: 0,
            status: ContributionStatus::Pending,
            reviewer_id: None,
            reviewed_at: None,
            approved_at: None,
            rejected_at: None,
            user_notes: new.user_notes,
            admin_notes: None,
            created_at: now,
            history,
        })
    }
}

/// Points awarded for an approved contribution: `floor(amount * rate)`.
pub fn points_for(amount: f64, conversion_rate: f64) -> i64 {
    (amount * conversion_rate).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt() -> ReceiptMeta {
        ReceiptMeta {
            filename: "a1b2.png".to_string(),
            original_name: "receipt.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 1024,
            path: "receipts/a1b2.png".to_string(),
            uploaded_at: Utc::now(),
        }
    }

    fn submission() -> NewContribution {
        NewContribution {
            submitter_id: UserId::from("user-1"),
            coin_symbol: "btc".to_string(),
            amount: 100.0,
            wallet_address: "wallet-abc".to_string(),
            receipt: receipt(),
            transaction_hash: Some("0xdeadbeef".to_string()),
            conversion_rate: 2.0,
            user_notes: None,
        }
    }

    #[test]
    fn test_submitted_creates_pending_with_one_history_entry() {
        let record = Contribution::submitted(submission(), Utc::now()).unwrap();

        assert_eq!(record.status, ContributionStatus::Pending);
        assert_eq!(record.points_awarded, 0);
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.history[0].action, HistoryAction::Submitted);
        assert_eq!(record.history[0].previous_status, None);
        assert_eq!(record.history[0].new_status, ContributionStatus::Pending);
    }

    #[test]
    fn test_submitted_uppercases_symbol() {
        let record = Contribution::submitted(submission(), Utc::now()).unwrap();
        assert_eq!(record.coin_symbol, "BTC");
    }

    #[test]
    fn test_submitted_rejects_bad_input() {
        let mut bad = submission();
        bad.amount = 0.0;
        assert!(Contribution::submitted(bad, Utc::now()).is_err());

        let mut bad = submission();
        bad.amount = -5.0;
        assert!(Contribution::submitted(bad, Utc::now()).is_err());

        let mut bad = submission();
        bad.coin_symbol = "  ".to_string();
        assert!(Contribution::submitted(bad, Utc::now()).is_err());

        let mut bad = submission();
        bad.wallet_address = String::new();
        assert!(Contribution::submitted(bad, Utc::now()).is_err());

        let mut bad = submission();
        bad.receipt.path = String::new();
        assert!(Contribution::submitted(bad, Utc::now()).is_err());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ContributionStatus::Pending.is_terminal());
        assert!(!ContributionStatus::UnderReview.is_terminal());
        assert!(ContributionStatus::Approved.is_terminal());
        assert!(ContributionStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            ContributionStatus::Pending,
            ContributionStatus::UnderReview,
            ContributionStatus::Approved,
            ContributionStatus::Rejected,
        ] {
            assert_eq!(ContributionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ContributionStatus::parse("bogus"), None);
    }

    #[test]
    fn test_points_for_floors() {
        assert_eq!(points_for(133.7, 2.0), 267);
        assert_eq!(points_for(50.0, 1.0), 50);
        assert_eq!(points_for(49.99, 1.0), 49);
        assert_eq!(points_for(10.0, 0.0), 0);
    }
}
