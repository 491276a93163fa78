pub mod auth;
pub mod coin;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod receipt;
pub mod review;
pub mod routes;

use auth::TokenVerifier;
use coin::CoinRegistry;
use rate_limit::RateGuard;
use receipt::ReceiptStore;
use review::ReviewStore;

/// Shared state for the HTTP layer.
pub struct AppState {
    pub review_store: ReviewStore,
    pub coin_registry: CoinRegistry,
    pub receipt_store: ReceiptStore,
    pub token_verifier: TokenVerifier,
    pub rate_guard: RateGuard,
    pub min_contribution_amount: f64,
}
