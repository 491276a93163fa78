use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    /// Shared secret for verifying bearer tokens.
    pub auth_secret: String,
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Directory receipt files are written to.
    pub receipt_dir: PathBuf,
    pub rate_limit_max_requests: usize,
    pub rate_limit_window: Duration,
    /// Submission floor enforced at the upload boundary.
    pub min_contribution_amount: f64,
    /// Legacy behavior: auto-register unknown currency symbols at
    /// conversion rate 1 instead of rejecting them.
    pub allow_unknown_currency: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let auth_secret =
            env::var("AUTH_SECRET").context("AUTH_SECRET environment variable is required")?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let receipt_dir = env::var("RECEIPT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("receipts"));

        let rate_limit_max_requests = env::var("RATE_LIMIT_MAX_REQUESTS")
            .unwrap_or_else(|_| "100".to_string())
            .parse::<usize>()
            .context("RATE_LIMIT_MAX_REQUESTS must be a valid number")?;

        let rate_limit_window_secs = env::var("RATE_LIMIT_WINDOW_SECS")
            .unwrap_or_else(|_| "900".to_string())
            .parse::<u64>()
            .context("RATE_LIMIT_WINDOW_SECS must be a valid number")?;

        let min_contribution_amount = env::var("MIN_CONTRIBUTION_AMOUNT")
            .unwrap_or_else(|_| "50".to_string())
            .parse::<f64>()
            .context("MIN_CONTRIBUTION_AMOUNT must be a valid number")?;

        let allow_unknown_currency = env::var("ALLOW_UNKNOWN_CURRENCY")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        Ok(Config {
            auth_secret,
            port,
            state_dir,
            receipt_dir,
            rate_limit_max_requests,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            min_contribution_amount,
            allow_unknown_currency,
        })
    }
}
