//! SQLite connection management for plans, ledger, usage markers and tickets.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::QuotaResult;

/// Default database location for the daemon
pub const DEFAULT_DB_PATH: &str = "/var/lib/deskd/desk.db";

/// Single connection guarded by an async mutex; all work runs on the blocking pool.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open or create the database at `path` and make sure the schema exists.
    pub async fn open(path: impl AsRef<Path>) -> QuotaResult<Self> {
        let db_path = path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        info!("Opening desk database at: {}", db_path.display());

        let open_path = db_path.clone();
        let conn = tokio::task::spawn_blocking(move || -> QuotaResult<Connection> {
            let conn = Connection::open(&open_path)?;

            // WAL lets status reads proceed while an admission holds the write lock
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;

            initialize_schema(&conn)?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: db_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn execute<F, R>(&self, f: F) -> QuotaResult<R>
    where
        F: FnOnce(&Connection) -> QuotaResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await?
    }

    /// Run `f` inside an IMMEDIATE transaction: commits on `Ok`, rolls back on `Err`.
    ///
    /// IMMEDIATE takes the database write lock up front, so a check-then-write
    /// inside `f` cannot interleave with another writer on the same file.
    pub async fn transact<F, R>(&self, f: F) -> QuotaResult<R>
    where
        F: FnOnce(&Connection) -> QuotaResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await?
    }
}

fn initialize_schema(conn: &Connection) -> QuotaResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS support_plans (
            name TEXT PRIMARY KEY,
            monthly_limit INTEGER NOT NULL CHECK (monthly_limit >= 0)
        );

        CREATE TABLE IF NOT EXISTS company_support (
            company TEXT PRIMARY KEY,
            plan_name TEXT NOT NULL,
            account_manager TEXT NOT NULL,
            location TEXT NOT NULL,
            contact_person TEXT NOT NULL,
            contact_mobile TEXT NOT NULL,
            registered_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bundle_grants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company TEXT NOT NULL,
            month TEXT NOT NULL,
            ticket_count INTEGER NOT NULL CHECK (ticket_count > 0),
            source TEXT NOT NULL CHECK (source IN ('manual', 'carry')),
            created_at TEXT NOT NULL,
            added_by TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_bundle_company_month
            ON bundle_grants(company, month, source);

        -- at most one carry-forward row per company-month
        CREATE UNIQUE INDEX IF NOT EXISTS idx_bundle_single_carry
            ON bundle_grants(company, month) WHERE source = 'carry';

        CREATE TABLE IF NOT EXISTS quota_usage (
            company TEXT NOT NULL,
            month TEXT NOT NULL,
            grace_used INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            grace_used_at TEXT,
            PRIMARY KEY (company, month)
        );

        CREATE TABLE IF NOT EXISTS tickets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject TEXT NOT NULL,
            kind TEXT NOT NULL,
            description TEXT NOT NULL,
            priority TEXT NOT NULL,
            requester_name TEXT NOT NULL,
            requester_company TEXT NOT NULL,
            requester_email TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            assigned_at TEXT,
            closed_at TEXT,
            engineer_name TEXT,
            work_done_comment TEXT,
            duration_secs INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_tickets_company_kind_created
            ON tickets(requester_company, kind, created_at);
        CREATE INDEX IF NOT EXISTS idx_tickets_company_status
            ON tickets(requester_company, status);",
    )?;

    debug!("Desk schema ready");
    Ok(())
}

/// Timestamps are stored as fixed-width UTC RFC 3339 so range scans compare lexically.
pub(crate) fn to_sql_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_sql_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn from_sql_timestamp_opt(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| from_sql_timestamp(idx, &s)).transpose()
}
