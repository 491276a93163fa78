//! SQLite implementation of `ContributionRepository`.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Forward Compatibility
//!
//! The full contribution record is stored as JSON alongside the indexed
//! columns. When adding fields to `Contribution`, use `#[serde(default)]`
//! so old persisted rows still deserialize.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{
    CasOutcome, CoinInfo, CoinStats, ContributionRepository, RepositoryError, UserAccount,
};
use crate::review::state::{Contribution, ContributionId, ContributionStatus, UserId};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed contribution repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite
/// operations without blocking the async runtime.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Create a new SQLite repository at the given path.
    ///
    /// Creates the database file and schema if they don't exist, and runs
    /// any pending migrations.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` for maximum durability
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();

        // Ensure parent directory exists (unless it's :memory: or empty path)
        let path_str = path_ref.to_string_lossy().to_string();
        if path_str != ":memory:" && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;

                    // Restrictive permissions on the state directory protect
                    // the WAL/SHM files SQLite creates with umask defaults.
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let dir_permissions = std::fs::Permissions::from_mode(0o700);
                        if let Err(e) = std::fs::set_permissions(parent, dir_permissions) {
                            warn!(
                                "Failed to set restrictive permissions on state directory: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        #[cfg(unix)]
        if path_str != ":memory:" && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // Verify WAL mode was actually enabled - SQLite can silently keep
        // DELETE mode on filesystems that don't support shared memory.
        // In-memory databases report "memory", which is fine.
        let is_in_memory = path_str == ":memory:";
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// An ephemeral in-memory database, for tests.
    pub fn in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        // Migration from version 0 (fresh database) to version 1
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS contributions (
                    id TEXT PRIMARY KEY,
                    submitter_id TEXT NOT NULL,
                    coin_symbol TEXT NOT NULL,
                    status TEXT NOT NULL,
                    transaction_hash TEXT UNIQUE,
                    created_at TEXT NOT NULL,
                    record_json TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_contributions_submitter
                    ON contributions(submitter_id);
                CREATE INDEX IF NOT EXISTS idx_contributions_status
                    ON contributions(status);

                CREATE TABLE IF NOT EXISTS point_credits (
                    contribution_id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    points INTEGER NOT NULL,
                    applied INTEGER NOT NULL DEFAULT 0,
                    recorded_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    points INTEGER NOT NULL DEFAULT 0,
                    voting_rights INTEGER NOT NULL DEFAULT 0,
                    total_contributions INTEGER NOT NULL DEFAULT 0,
                    approved_contributions INTEGER NOT NULL DEFAULT 0,
                    rejected_contributions INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS coins (
                    symbol TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    wallet_info TEXT,
                    conversion_rate REAL NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    total_contributions INTEGER NOT NULL DEFAULT 0,
                    total_amount REAL NOT NULL DEFAULT 0,
                    total_points_awarded INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS coin_contributors (
                    symbol TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    PRIMARY KEY (symbol, user_id)
                );
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Run a synchronous closure against the connection on the blocking
    /// pool. `operation` names the call for error reporting.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, String> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            f(&mut *conn)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, format!("task join: {}", e)))?
        .map_err(|e| RepositoryError::storage(operation, e))
    }
}

fn decode_record(id: &str, json: &str) -> Result<Contribution, String> {
    serde_json::from_str(json).map_err(|e| format!("corrupt record {}: {}", id, e))
}

fn encode_record(contribution: &Contribution) -> Result<String, String> {
    serde_json::to_string(contribution).map_err(|e| e.to_string())
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Contribution>, String> {
    let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params, |row| {
            let id: String = row.get(0)?;
            let json: String = row.get(1)?;
            Ok((id, json))
        })
        .map_err(|e| e.to_string())?;

    let mut records = Vec::new();
    for row in rows {
        let (id, json) = row.map_err(|e| e.to_string())?;
        records.push(decode_record(&id, &json)?);
    }
    Ok(records)
}

#[async_trait]
impl ContributionRepository for SqliteRepository {
    async fn insert(&self, contribution: &Contribution) -> Result<(), RepositoryError> {
        let record = contribution.clone();
        self.with_conn("insert contribution", move |conn| {
            let json = encode_record(&record)?;
            conn.execute(
                "INSERT INTO contributions \
                 (id, submitter_id, coin_symbol, status, transaction_hash, created_at, record_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.to_string(),
                    record.submitter_id.0,
                    record.coin_symbol,
                    record.status.as_str(),
                    record.transaction_hash,
                    record.created_at.to_rfc3339(),
                    json,
                ],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &ContributionId) -> Result<Option<Contribution>, RepositoryError> {
        let id = id.to_string();
        self.with_conn("get contribution", move |conn| {
            let row: Option<String> = conn
                .query_row(
                    "SELECT record_json FROM contributions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| e.to_string())?;
            row.map(|json| decode_record(&id, &json)).transpose()
        })
        .await
    }

    async fn list_by_submitter(
        &self,
        submitter: &UserId,
    ) -> Result<Vec<Contribution>, RepositoryError> {
        let submitter = submitter.0.clone();
        self.with_conn("list by submitter", move |conn| {
            query_records(
                conn,
                "SELECT id, record_json FROM contributions \
                 WHERE submitter_id = ?1 ORDER BY created_at DESC",
                &[&submitter],
            )
        })
        .await
    }

    async fn list_pending(&self) -> Result<Vec<Contribution>, RepositoryError> {
        self.with_conn("list pending", move |conn| {
            query_records(
                conn,
                "SELECT id, record_json FROM contributions \
                 WHERE status IN ('pending', 'under_review') ORDER BY created_at DESC",
                &[],
            )
        })
        .await
    }

    async fn list_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: Option<ContributionStatus>,
    ) -> Result<Vec<Contribution>, RepositoryError> {
        let start = start.to_rfc3339();
        let end = end.to_rfc3339();
        self.with_conn("list by date range", move |conn| match status {
            Some(status) => query_records(
                conn,
                "SELECT id, record_json FROM contributions \
                 WHERE created_at >= ?1 AND created_at <= ?2 AND status = ?3 \
                 ORDER BY created_at DESC",
                &[&start, &end, &status.as_str()],
            ),
            None => query_records(
                conn,
                "SELECT id, record_json FROM contributions \
                 WHERE created_at >= ?1 AND created_at <= ?2 \
                 ORDER BY created_at DESC",
                &[&start, &end],
            ),
        })
        .await
    }

    async fn transaction_hash_exists(&self, hash: &str) -> Result<bool, RepositoryError> {
        let hash = hash.to_string();
        self.with_conn("check transaction hash", move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM contributions WHERE transaction_hash = ?1)",
                params![hash],
                |row| row.get(0),
            )
            .map_err(|e| e.to_string())
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        id: &ContributionId,
        expected: ContributionStatus,
        updated: &Contribution,
    ) -> Result<CasOutcome, RepositoryError> {
        let id = id.to_string();
        let updated = updated.clone();
        self.with_conn("compare and swap", move |conn| {
            let json = encode_record(&updated)?;
            // The conditional UPDATE is the serialization point: only the
            // writer whose expected status still matches wins.
            let changed = conn
                .execute(
                    "UPDATE contributions SET status = ?1, record_json = ?2 \
                     WHERE id = ?3 AND status = ?4",
                    params![updated.status.as_str(), json, id, expected.as_str()],
                )
                .map_err(|e| e.to_string())?;

            if changed > 0 {
                return Ok(CasOutcome::Applied);
            }

            let actual: Option<String> = conn
                .query_row(
                    "SELECT status FROM contributions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| e.to_string())?;

            Ok(CasOutcome::Conflict {
                actual: actual.as_deref().and_then(ContributionStatus::parse),
            })
        })
        .await
    }

    async fn apply_point_credit(
        &self,
        id: &ContributionId,
        user: &UserId,
        points: i64,
    ) -> Result<bool, RepositoryError> {
        let id = id.to_string();
        let user = user.0.clone();
        self.with_conn("apply point credit", move |conn| {
            let tx = conn.transaction().map_err(|e| e.to_string())?;

            // Ledger claim in the INSERT OR IGNORE + conditional UPDATE
            // shape: the loser of a duplicate attempt changes zero rows.
            tx.execute(
                "INSERT OR IGNORE INTO point_credits \
                 (contribution_id, user_id, points, applied, recorded_at) \
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![id, user, points, Utc::now().to_rfc3339()],
            )
            .map_err(|e| e.to_string())?;

            let claimed = tx
                .execute(
                    "UPDATE point_credits SET applied = 1 \
                     WHERE contribution_id = ?1 AND applied = 0",
                    params![id],
                )
                .map_err(|e| e.to_string())?;

            if claimed == 0 {
                // Already applied by an earlier call.
                tx.commit().map_err(|e| e.to_string())?;
                return Ok(false);
            }

            tx.execute(
                "INSERT OR IGNORE INTO users (id) VALUES (?1)",
                params![user],
            )
            .map_err(|e| e.to_string())?;
            tx.execute(
                "UPDATE users SET \
                 points = points + ?1, \
                 approved_contributions = approved_contributions + 1, \
                 voting_rights = CASE WHEN points + ?1 > 0 THEN 1 ELSE voting_rights END \
                 WHERE id = ?2",
                params![points, user],
            )
            .map_err(|e| e.to_string())?;

            tx.commit().map_err(|e| e.to_string())?;
            Ok(true)
        })
        .await
    }

    async fn point_credit_applied(&self, id: &ContributionId) -> Result<bool, RepositoryError> {
        let id = id.to_string();
        self.with_conn("check point credit", move |conn| {
            let applied: Option<i64> = conn
                .query_row(
                    "SELECT applied FROM point_credits WHERE contribution_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| e.to_string())?;
            Ok(applied == Some(1))
        })
        .await
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<UserAccount>, RepositoryError> {
        let id = id.0.clone();
        self.with_conn("get user", move |conn| {
            conn.query_row(
                "SELECT id, points, voting_rights, total_contributions, \
                 approved_contributions, rejected_contributions \
                 FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(UserAccount {
                        id: UserId(row.get(0)?),
                        points: row.get(1)?,
                        voting_rights: row.get::<_, i64>(2)? != 0,
                        total_contributions: row.get(3)?,
                        approved_contributions: row.get(4)?,
                        rejected_contributions: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|e| e.to_string())
        })
        .await
    }

    async fn record_submission_for_user(&self, id: &UserId) -> Result<(), RepositoryError> {
        let id = id.0.clone();
        self.with_conn("record submission for user", move |conn| {
            conn.execute(
                "INSERT INTO users (id, total_contributions) VALUES (?1, 1) \
                 ON CONFLICT(id) DO UPDATE SET \
                 total_contributions = total_contributions + 1",
                params![id],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
    }

    async fn record_rejection_for_user(&self, id: &UserId) -> Result<(), RepositoryError> {
        let id = id.0.clone();
        self.with_conn("record rejection for user", move |conn| {
            conn.execute(
                "INSERT INTO users (id, rejected_contributions) VALUES (?1, 1) \
                 ON CONFLICT(id) DO UPDATE SET \
                 rejected_contributions = rejected_contributions + 1",
                params![id],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
    }

    async fn get_coin(&self, symbol: &str) -> Result<Option<CoinInfo>, RepositoryError> {
        let symbol = symbol.to_string();
        self.with_conn("get coin", move |conn| {
            conn.query_row(
                "SELECT c.symbol, c.name, c.wallet_info, c.conversion_rate, c.is_active, \
                 c.total_contributions, c.total_amount, c.total_points_awarded, \
                 (SELECT COUNT(*) FROM coin_contributors cc WHERE cc.symbol = c.symbol) \
                 FROM coins c WHERE c.symbol = ?1",
                params![symbol],
                |row| {
                    Ok(CoinInfo {
                        symbol: row.get(0)?,
                        name: row.get(1)?,
                        wallet_info: row.get(2)?,
                        conversion_rate: row.get(3)?,
                        is_active: row.get::<_, i64>(4)? != 0,
                        stats: CoinStats {
                            total_contributions: row.get(5)?,
                            total_amount: row.get(6)?,
                            total_points_awarded: row.get(7)?,
                            unique_contributors: row.get(8)?,
                        },
                    })
                },
            )
            .optional()
            .map_err(|e| e.to_string())
        })
        .await
    }

    async fn upsert_coin(&self, coin: &CoinInfo) -> Result<(), RepositoryError> {
        let coin = coin.clone();
        self.with_conn("upsert coin", move |conn| {
            // Aggregates are preserved on replace; only the definition
            // columns are updated.
            conn.execute(
                "INSERT INTO coins (symbol, name, wallet_info, conversion_rate, is_active) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(symbol) DO UPDATE SET \
                 name = excluded.name, \
                 wallet_info = excluded.wallet_info, \
                 conversion_rate = excluded.conversion_rate, \
                 is_active = excluded.is_active",
                params![
                    coin.symbol,
                    coin.name,
                    coin.wallet_info,
                    coin.conversion_rate,
                    coin.is_active as i64,
                ],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
    }

    async fn record_coin_approval(
        &self,
        symbol: &str,
        contributor: &UserId,
        amount: f64,
        points: i64,
    ) -> Result<(), RepositoryError> {
        let symbol = symbol.to_string();
        let contributor = contributor.0.clone();
        self.with_conn("record coin approval", move |conn| {
            let tx = conn.transaction().map_err(|e| e.to_string())?;

            tx.execute(
                "INSERT OR IGNORE INTO coin_contributors (symbol, user_id) VALUES (?1, ?2)",
                params![symbol, contributor],
            )
            .map_err(|e| e.to_string())?;

            let changed = tx
                .execute(
                    "UPDATE coins SET \
                     total_contributions = total_contributions + 1, \
                     total_amount = total_amount + ?1, \
                     total_points_awarded = total_points_awarded + ?2 \
                     WHERE symbol = ?3",
                    params![amount, points, symbol],
                )
                .map_err(|e| e.to_string())?;

            if changed == 0 {
                return Err(format!("unknown coin {}", symbol));
            }

            tx.commit().map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
    }
}
