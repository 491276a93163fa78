//! Coin registry collaborator.
//!
//! Resolves a currency symbol to its conversion rate and active flag
//! ahead of submission. Unknown symbols are rejected by default; the
//! legacy auto-registration behavior (minting a placeholder coin at rate
//! 1 from unvalidated user input) is available behind a config flag and
//! logged loudly when it fires.

use std::sync::Arc;

use tracing::warn;

use crate::error::AppError;
use crate::review::repository::{CoinInfo, CoinStats, ContributionRepository};

pub struct CoinRegistry {
    repository: Arc<dyn ContributionRepository>,
    allow_unknown_currency: bool,
}

impl CoinRegistry {
    pub fn new(repository: Arc<dyn ContributionRepository>, allow_unknown_currency: bool) -> Self {
        Self {
            repository,
            allow_unknown_currency,
        }
    }

    /// Resolve a symbol to an active coin, normalizing case.
    pub async fn resolve(&self, symbol: &str) -> Result<CoinInfo, AppError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(AppError::Validation(
                "currency symbol must not be empty".to_string(),
            ));
        }

        if let Some(coin) = self.repository.get_coin(&symbol).await? {
            if !coin.is_active {
                return Err(AppError::Validation(format!(
                    "currency {} is not accepting contributions",
                    symbol
                )));
            }
            return Ok(coin);
        }

        if !self.allow_unknown_currency {
            return Err(AppError::Validation(format!(
                "unknown currency {}",
                symbol
            )));
        }

        // Legacy behavior: mint a placeholder at rate 1. Kept behind a
        // flag because it lets user input create coin records.
        warn!(symbol = %symbol, "auto-registering unknown currency at conversion rate 1");
        let coin = CoinInfo {
            symbol: symbol.clone(),
            name: symbol.clone(),
            wallet_info: None,
            conversion_rate: 1.0,
            is_active: true,
            stats: CoinStats::default(),
        };
        self.repository.upsert_coin(&coin).await?;
        Ok(coin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::repository::InMemoryRepository;

    async fn repo_with_btc() -> Arc<InMemoryRepository> {
        let repo = Arc::new(InMemoryRepository::new());
        repo.upsert_coin(&CoinInfo {
            symbol: "BTC".to_string(),
            name: "Bitcoin".to_string(),
            wallet_info: Some("bc1...".to_string()),
            conversion_rate: 4.0,
            is_active: true,
            stats: CoinStats::default(),
        })
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_resolve_normalizes_case() {
        let registry = CoinRegistry::new(repo_with_btc().await, false);
        let coin = registry.resolve("btc").await.unwrap();
        assert_eq!(coin.symbol, "BTC");
        assert_eq!(coin.conversion_rate, 4.0);
    }

    #[tokio::test]
    async fn test_unknown_currency_rejected_by_default() {
        let registry = CoinRegistry::new(repo_with_btc().await, false);
        let err = registry.resolve("DOGE").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_currency_auto_registered_when_allowed() {
        let repo = repo_with_btc().await;
        let registry = CoinRegistry::new(repo.clone(), true);

        let coin = registry.resolve("DOGE").await.unwrap();
        assert_eq!(coin.symbol, "DOGE");
        assert_eq!(coin.conversion_rate, 1.0);
        assert!(coin.is_active);

        // the placeholder was persisted
        assert!(repo.get_coin("DOGE").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_inactive_currency_rejected() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.upsert_coin(&CoinInfo {
            symbol: "XMR".to_string(),
            name: "Monero".to_string(),
            wallet_info: None,
            conversion_rate: 2.0,
            is_active: false,
            stats: CoinStats::default(),
        })
        .await
        .unwrap();

        let registry = CoinRegistry::new(repo, true);
        let err = registry.resolve("XMR").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
