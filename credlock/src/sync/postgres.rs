//! PostgreSQL repositories
//!
//! Accounts come from `pg_catalog.pg_user` (all accounts) or from
//! `<schema>.accounts_lockable` (curated subset). History rows live in
//! `<schema>.accounts_password_history`; see [`PgHistoryRepository::install`]
//! for the table definitions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::warn;

use super::repository::{AccountSource, HistoryRepository, PersistedHistory};
use crate::account::AccountKey;
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::history::PasswordFingerprint;

/// Create a PostgreSQL connection pool, retrying with exponential backoff
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_connect(config).await {
            Ok(pool) => {
                if attempt > 0 {
                    tracing::info!(
                        "Database connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!(
                        "Database connection pool created: max={}",
                        config.max_connections
                    );
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to database after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                tracing::warn!(
                    "Database connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_connect(config: &DatabaseConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| {
            Error::Repository(format!(
                "failed to connect to database at '{}': {}",
                config.redacted_url(),
                e
            ))
        })
}

fn account_keys(names: Vec<String>) -> Vec<AccountKey> {
    names
        .into_iter()
        .filter_map(|name| match AccountKey::new(name) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "Skipping account that cannot be tracked");
                None
            }
        })
        .collect()
}

/// Account list read from the database catalog
#[derive(Debug, Clone)]
pub struct PgAccountSource {
    pool: PgPool,
    schema: String,
}

impl PgAccountSource {
    /// Create a source over a pool; `schema` holds `accounts_lockable`
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

impl AccountSource for PgAccountSource {
    async fn fetch_account_names(&self, track_all: bool) -> Result<Vec<AccountKey>> {
        let sql = if track_all {
            "SELECT usename::text FROM pg_catalog.pg_user ORDER BY usename".to_string()
        } else {
            format!(
                "SELECT usename::text FROM {}.accounts_lockable ORDER BY usename",
                self.schema
            )
        };
        let names: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(account_keys(names))
    }
}

/// Password history stored in `<schema>.accounts_password_history`
#[derive(Debug, Clone)]
pub struct PgHistoryRepository {
    pool: PgPool,
    schema: String,
}

impl PgHistoryRepository {
    /// Create a repository over a pool
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    fn table(&self) -> String {
        format!("{}.accounts_password_history", self.schema)
    }

    /// Create the schema and tables if they do not exist
    pub async fn install(&self) -> Result<()> {
        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema),
            format!(
                "CREATE TABLE IF NOT EXISTS {}.accounts_lockable (usename name PRIMARY KEY)",
                self.schema
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 usename name NOT NULL, \
                 password_hash text NOT NULL, \
                 changed_at timestamptz NOT NULL, \
                 PRIMARY KEY (usename, password_hash))",
                self.table()
            ),
        ];
        for sql in &statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        tracing::info!(schema = %self.schema, "Password history tables installed");
        Ok(())
    }
}

impl HistoryRepository for PgHistoryRepository {
    async fn is_enabled(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(self.table())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn is_read_only(&self) -> Result<bool> {
        let setting: String = sqlx::query_scalar("SELECT current_setting('transaction_read_only')")
            .fetch_one(&self.pool)
            .await?;
        Ok(setting == "on")
    }

    async fn fetch_history(&self, limit_per_account: usize) -> Result<Vec<PersistedHistory>> {
        let limit = i64::try_from(limit_per_account).unwrap_or(i64::MAX);
        let sql = format!(
            "WITH ranked_history AS ( \
               SELECT usename::text AS usename, password_hash, changed_at, \
                      ROW_NUMBER() OVER (PARTITION BY usename ORDER BY changed_at DESC) AS row_num \
               FROM {} \
             ) \
             SELECT usename, password_hash, changed_at FROM ranked_history WHERE row_num <= $1",
            self.table()
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            let usename: String = row.try_get("usename")?;
            let hash: String = row.try_get("password_hash")?;
            let changed_at: DateTime<Utc> = row.try_get("changed_at")?;

            let Ok(account) = AccountKey::new(usename) else {
                continue;
            };
            let fingerprint = match PasswordFingerprint::from_hex(&hash) {
                Ok(fingerprint) => fingerprint,
                Err(e) => {
                    warn!(account = %account, error = %e, "Skipping unreadable history row");
                    continue;
                }
            };
            history.push(PersistedHistory {
                account,
                fingerprint,
                changed_at,
            });
        }
        Ok(history)
    }

    async fn append_history(&self, row: &PersistedHistory) -> Result<bool> {
        let sql = format!(
            "INSERT INTO {} (usename, password_hash, changed_at) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
            self.table()
        );
        let result = sqlx::query(&sql)
            .bind(row.account.as_str())
            .bind(row.fingerprint.to_hex())
            .bind(row.changed_at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn prune_history(&self, account: &AccountKey, older_than: DateTime<Utc>) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE usename = $1 AND changed_at < $2",
            self.table()
        );
        let result = sqlx::query(&sql)
            .bind(account.as_str())
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn prune_removed_accounts(&self) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} h WHERE NOT EXISTS \
             (SELECT 1 FROM pg_catalog.pg_user u WHERE u.usename = h.usename)",
            self.table()
        );
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
