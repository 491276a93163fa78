//! Pure transition function for the contribution review lifecycle.
//!
//! The transition function is the core of the state machine: it takes an
//! immutable snapshot of a contribution and a review action, and returns
//! the updated snapshot plus the side effects that must be applied.
//! It performs no I/O; the [`crate::review::store::ReviewStore`] owns
//! persistence and effect execution.

use chrono::{DateTime, Utc};

use super::state::{
    points_for, Contribution, ContributionId, ContributionStatus, HistoryAction, HistoryEntry,
    UserId,
};

/// An action an authorized reviewer can apply to a contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    PutUnderReview,
    Approve,
    Reject,
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PutUnderReview => "put_under_review",
            Self::Approve => "approve",
            Self::Reject => "reject",
        };
        write!(f, "{}", s)
    }
}

/// Side effect to apply after the record write succeeds.
///
/// Effects are descriptions, not actions; the store executes them against
/// the repository so the transition stays pure.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Credit the submitter's point balance, idempotently keyed by
    /// contribution id, and bump their approved-contribution counter.
    CreditPoints {
        contribution_id: ContributionId,
        user_id: UserId,
        points: i64,
    },
    /// Fold the approved contribution into the coin's aggregate stats.
    RecordCoinApproval {
        coin_symbol: String,
        contributor: UserId,
        amount: f64,
        points: i64,
    },
    /// Bump the submitter's rejected-contribution counter.
    RecordRejection { user_id: UserId },
}

/// Result of applying a review action to a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    /// The updated record, ready to be written back conditionally on the
    /// status it was read at.
    pub contribution: Contribution,
    /// Effects to execute once the write has been applied.
    pub effects: Vec<Effect>,
}

/// The transition table. Returns the target status, or None if the action
/// is not permitted from the given status.
pub fn next_status(from: ContributionStatus, action: ReviewAction) -> Option<ContributionStatus> {
    use ContributionStatus::*;
    match (from, action) {
        (Pending, ReviewAction::PutUnderReview) => Some(UnderReview),
        (Pending | UnderReview, ReviewAction::Approve) => Some(Approved),
        (Pending | UnderReview, ReviewAction::Reject) => Some(Rejected),
        _ => None,
    }
}

/// Apply a review action to a contribution snapshot.
///
/// On an illegal transition the snapshot is returned untouched inside
/// `Err`, carrying the status the attempt was made from.
pub fn transition(
    contribution: Contribution,
    action: ReviewAction,
    reviewer: UserId,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<TransitionResult, ContributionStatus> {
    let from = contribution.status;
    let Some(to) = next_status(from, action) else {
        return Err(from);
    };

    let mut updated = contribution;
    updated.status = to;
    updated.reviewer_id = Some(reviewer.clone());
    updated.reviewed_at = Some(now);
    if let Some(n) = &notes {
        updated.admin_notes = Some(n.clone());
    }

    let (history_action, effects) = match action {
        ReviewAction::PutUnderReview => (HistoryAction::UnderReview, vec![]),
        ReviewAction::Approve => {
            let points = points_for(updated.amount, updated.conversion_rate);
            updated.points_awarded = points;
            updated.approved_at = Some(now);
            (
                HistoryAction::Approved,
                vec![
                    Effect::CreditPoints {
                        contribution_id: updated.id,
                        user_id: updated.submitter_id.clone(),
                        points,
                    },
                    Effect::RecordCoinApproval {
                        coin_symbol: updated.coin_symbol.clone(),
                        contributor: updated.submitter_id.clone(),
                        amount: updated.amount,
                        points,
                    },
                ],
            )
        }
        ReviewAction::Reject => {
            updated.rejected_at = Some(now);
            (
                HistoryAction::Rejected,
                vec![Effect::RecordRejection {
                    user_id: updated.submitter_id.clone(),
                }],
            )
        }
    };

    updated.history.push(HistoryEntry {
        action: history_action,
        performed_by: reviewer,
        timestamp: now,
        notes,
        previous_status: Some(from),
        new_status: to,
    });

    Ok(TransitionResult {
        contribution: updated,
        effects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::state::{NewContribution, ReceiptMeta};

    fn pending_contribution() -> Contribution {
        let receipt = ReceiptMeta {
            filename: "f.png".to_string(),
            original_name: "receipt.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 512,
            path: "receipts/f.png".to_string(),
            uploaded_at: Utc::now(),
        };
        Contribution::submitted(
            NewContribution {
                submitter_id: UserId::from("submitter"),
                coin_symbol: "BTC".to_string(),
                amount: 133.7,
                wallet_address: "wallet".to_string(),
                receipt,
                transaction_hash: None,
                conversion_rate: 2.0,
                user_notes: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_transition_table() {
        use ContributionStatus::*;
        assert_eq!(
            next_status(Pending, ReviewAction::PutUnderReview),
            Some(UnderReview)
        );
        assert_eq!(next_status(Pending, ReviewAction::Approve), Some(Approved));
        assert_eq!(next_status(Pending, ReviewAction::Reject), Some(Rejected));
        assert_eq!(
            next_status(UnderReview, ReviewAction::Approve),
            Some(Approved)
        );
        assert_eq!(
            next_status(UnderReview, ReviewAction::Reject),
            Some(Rejected)
        );

        // under_review is only reachable from pending
        assert_eq!(next_status(UnderReview, ReviewAction::PutUnderReview), None);

        // terminal states accept nothing
        for terminal in [Approved, Rejected] {
            for action in [
                ReviewAction::PutUnderReview,
                ReviewAction::Approve,
                ReviewAction::Reject,
            ] {
                assert_eq!(next_status(terminal, action), None);
            }
        }
    }

    #[test]
    fn test_approve_sets_points_and_timestamps() {
        let record = pending_contribution();
        let now = Utc::now();

        let result = transition(
            record,
            ReviewAction::Approve,
            UserId::from("admin"),
            Some("looks good".to_string()),
            now,
        )
        .unwrap();

        let approved = &result.contribution;
        assert_eq!(approved.status, ContributionStatus::Approved);
        // floor(133.7 * 2) == 267
        assert_eq!(approved.points_awarded, 267);
        assert_eq!(approved.reviewed_at, Some(now));
        assert_eq!(approved.approved_at, Some(now));
        assert_eq!(approved.reviewer_id, Some(UserId::from("admin")));
        assert_eq!(approved.admin_notes.as_deref(), Some("looks good"));

        assert_eq!(result.effects.len(), 2);
        assert_eq!(
            result.effects[0],
            Effect::CreditPoints {
                contribution_id: approved.id,
                user_id: UserId::from("submitter"),
                points: 267,
            }
        );
        assert!(matches!(
            result.effects[1],
            Effect::RecordCoinApproval { points: 267, .. }
        ));
    }

    #[test]
    fn test_reject_leaves_points_at_zero() {
        let record = pending_contribution();
        let now = Utc::now();

        let result = transition(record, ReviewAction::Reject, UserId::from("admin"), None, now)
            .unwrap();

        let rejected = &result.contribution;
        assert_eq!(rejected.status, ContributionStatus::Rejected);
        assert_eq!(rejected.points_awarded, 0);
        assert_eq!(rejected.rejected_at, Some(now));
        assert_eq!(rejected.approved_at, None);
        assert_eq!(
            result.effects,
            vec![Effect::RecordRejection {
                user_id: UserId::from("submitter")
            }]
        );
    }

    #[test]
    fn test_put_under_review_has_no_effects() {
        let record = pending_contribution();
        let now = Utc::now();

        let result = transition(
            record,
            ReviewAction::PutUnderReview,
            UserId::from("mod"),
            None,
            now,
        )
        .unwrap();

        assert_eq!(result.contribution.status, ContributionStatus::UnderReview);
        assert_eq!(result.contribution.reviewed_at, Some(now));
        assert!(result.effects.is_empty());
    }

    #[test]
    fn test_history_chains_across_transitions() {
        let record = pending_contribution();

        let under_review = transition(
            record,
            ReviewAction::PutUnderReview,
            UserId::from("mod"),
            None,
            Utc::now(),
        )
        .unwrap()
        .contribution;

        let approved = transition(
            under_review,
            ReviewAction::Approve,
            UserId::from("admin"),
            None,
            Utc::now(),
        )
        .unwrap()
        .contribution;

        assert_eq!(approved.history.len(), 3);

        assert_eq!(approved.history[0].action, HistoryAction::Submitted);
        assert_eq!(approved.history[0].previous_status, None);
        assert_eq!(approved.history[0].new_status, ContributionStatus::Pending);

        assert_eq!(approved.history[1].action, HistoryAction::UnderReview);
        assert_eq!(
            approved.history[1].previous_status,
            Some(ContributionStatus::Pending)
        );
        assert_eq!(
            approved.history[1].new_status,
            ContributionStatus::UnderReview
        );

        assert_eq!(approved.history[2].action, HistoryAction::Approved);
        assert_eq!(
            approved.history[2].previous_status,
            Some(ContributionStatus::UnderReview)
        );
        assert_eq!(approved.history[2].new_status, ContributionStatus::Approved);
    }

    #[test]
    fn test_terminal_states_refuse_transitions() {
        let record = pending_contribution();
        let approved = transition(
            record,
            ReviewAction::Approve,
            UserId::from("admin"),
            None,
            Utc::now(),
        )
        .unwrap()
        .contribution;
        let history_len = approved.history.len();

        let err = transition(
            approved.clone(),
            ReviewAction::Approve,
            UserId::from("admin"),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, ContributionStatus::Approved);

        // the losing attempt must not have produced a new snapshot
        assert_eq!(approved.history.len(), history_len);
    }
}
