//! Fixed-window request admission control keyed by principal.
//!
//! Per principal, the guard keeps the timestamps of admitted requests.
//! On each call it discards timestamps older than the window, then admits
//! and records the request if the remaining count is below the maximum.
//! Denials carry a retry-after of the full window, in whole seconds.
//!
//! State is process-local and reset on restart; this is an accepted
//! simplification for single-instance deployments. Distributed
//! deployments swap the guard out behind the same `admit` surface.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::warn;

use crate::error::AppError;

/// Admission limits for the guard.
#[derive(Debug, Clone)]
pub struct RateGuardConfig {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateGuardConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(15 * 60),
        }
    }
}

/// Fixed-window admission control.
pub struct RateGuard {
    config: RateGuardConfig,
    /// Admitted request timestamps per principal.
    windows: RwLock<HashMap<String, Vec<Instant>>>,
}

impl RateGuard {
    pub fn new(config: RateGuardConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Admit or deny a request from `principal_id`.
    ///
    /// Denials return `RateLimited` with the retry-after duration.
    pub async fn admit(&self, principal_id: &str) -> Result<(), AppError> {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        let window = windows.entry(principal_id.to_string()).or_default();

        // Prune inline; there is no background sweeper.
        window.retain(|t| now.duration_since(*t) < self.config.window);

        if window.len() >= self.config.max_requests {
            warn!(
                principal = principal_id,
                in_window = window.len(),
                "request denied by rate guard"
            );
            return Err(AppError::RateLimited {
                retry_after_secs: self.config.window.as_secs(),
            });
        }

        window.push(now);
        Ok(())
    }

    /// Number of requests currently counted against a principal.
    pub async fn in_window(&self, principal_id: &str) -> usize {
        let now = Instant::now();
        let windows = self.windows.read().await;
        windows
            .get(principal_id)
            .map(|w| {
                w.iter()
                    .filter(|t| now.duration_since(**t) < self.config.window)
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for RateGuard {
    fn default() -> Self {
        Self::new(RateGuardConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(max_requests: usize, window_ms: u64) -> RateGuard {
        RateGuard::new(RateGuardConfig {
            max_requests,
            window: Duration::from_millis(window_ms),
        })
    }

    #[tokio::test]
    async fn test_allows_up_to_max_then_denies() {
        let guard = guard(3, 1000);

        assert!(guard.admit("alice").await.is_ok());
        assert!(guard.admit("alice").await.is_ok());
        assert!(guard.admit("alice").await.is_ok());

        let err = guard.admit("alice").await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited { retry_after_secs: 1 }));
    }

    #[tokio::test]
    async fn test_window_expiry_readmits() {
        let guard = guard(3, 200);

        for _ in 0..3 {
            guard.admit("alice").await.unwrap();
        }
        assert!(guard.admit("alice").await.is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(guard.admit("alice").await.is_ok());
    }

    #[tokio::test]
    async fn test_principals_are_independent() {
        let guard = guard(1, 1000);

        guard.admit("alice").await.unwrap();
        assert!(guard.admit("alice").await.is_err());

        // bob still has a fresh window
        assert!(guard.admit("bob").await.is_ok());
    }

    #[tokio::test]
    async fn test_in_window_counts_pruned() {
        let guard = guard(5, 100);
        guard.admit("alice").await.unwrap();
        guard.admit("alice").await.unwrap();
        assert_eq!(guard.in_window("alice").await, 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(guard.in_window("alice").await, 0);
    }
}
