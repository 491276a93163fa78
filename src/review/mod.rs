//! Contribution review lifecycle.
//!
//! The design separates:
//! - **State**: the contribution record and its audit history (`state`)
//! - **Transition**: a pure function from snapshot + action to a new
//!   snapshot plus side-effect descriptions (`transition`)
//! - **Repository**: the persistence port, including the status
//!   compare-and-swap and the idempotent point-credit ledger
//!   (`repository`)
//! - **Store**: orchestration of reads, conditional writes, and effect
//!   execution (`store`)

pub mod repository;
pub mod state;
pub mod store;
pub mod transition;

pub use state::{Contribution, ContributionId, ContributionStatus, NewContribution, UserId};
pub use store::ReviewStore;
pub use transition::ReviewAction;
