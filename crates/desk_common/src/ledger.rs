//! Bundle ledger: append-only grants of extra service requests.
//!
//! Every purchase, admin grant and carry-forward is its own row. Rows are
//! never merged, updated or deleted, so the history stays auditable.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::db::{from_sql_timestamp, to_sql_timestamp};
use crate::error::{QuotaError, QuotaResult};
use crate::month::Month;

pub type GrantId = i64;

/// Where a grant came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    /// Admin grant or self-service purchase
    Manual,
    /// Unused manual allowance rolled over from the previous month
    Carry,
}

impl GrantSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantSource::Manual => "manual",
            GrantSource::Carry => "carry",
        }
    }
}

impl fmt::Display for GrantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantSource {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(GrantSource::Manual),
            "carry" => Ok(GrantSource::Carry),
            other => Err(QuotaError::InvalidBundle(format!("unknown source '{}'", other))),
        }
    }
}

impl ToSql for GrantSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for GrantSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: QuotaError| FromSqlError::Other(Box::new(e)))
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleGrant {
    pub id: GrantId,
    pub company: String,
    pub month: Month,
    pub ticket_count: u32,
    pub source: GrantSource,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
}

/// Append a grant. Carry rows go through [`insert_carry`] so the
/// one-per-month rule is enforced by the unique index.
pub fn add_grant(
    conn: &Connection,
    company: &str,
    month: Month,
    ticket_count: u32,
    source: GrantSource,
    added_by: Option<&str>,
    now: DateTime<Utc>,
) -> QuotaResult<GrantId> {
    if ticket_count == 0 {
        return Err(QuotaError::InvalidBundle(
            "ticket count must be greater than zero".into(),
        ));
    }
    if source == GrantSource::Carry {
        return insert_carry(conn, company, month, ticket_count, now)?
            .ok_or_else(|| QuotaError::Conflict(format!("Carry-forward for {} {}", company, month)));
    }

    conn.execute(
        "INSERT INTO bundle_grants (company, month, ticket_count, source, created_at, added_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![company, month, ticket_count, source, to_sql_timestamp(&now), added_by],
    )?;
    let id = conn.last_insert_rowid();
    info!(
        "Bundle #{}: {} tickets for {} {} ({}, by {})",
        id,
        ticket_count,
        company,
        month,
        source,
        added_by.unwrap_or("-")
    );
    Ok(id)
}

/// Insert the carry row for `company`/`month` unless one already exists.
///
/// Returns `None` when another writer got there first.
pub fn insert_carry(
    conn: &Connection,
    company: &str,
    month: Month,
    ticket_count: u32,
    now: DateTime<Utc>,
) -> QuotaResult<Option<GrantId>> {
    if ticket_count == 0 {
        return Err(QuotaError::InvalidBundle(
            "carry-forward must be greater than zero".into(),
        ));
    }
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO bundle_grants (company, month, ticket_count, source, created_at, added_by)
         VALUES (?1, ?2, ?3, 'carry', ?4, NULL)",
        params![company, month, ticket_count, to_sql_timestamp(&now)],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    let id = conn.last_insert_rowid();
    info!("[Carry Forward] {} tickets carried to {} for {}", ticket_count, month, company);
    Ok(Some(id))
}

/// Sum of `ticket_count` for matching rows, 0 if none. Saturates at `u32::MAX`.
pub fn sum_grants(
    conn: &Connection,
    company: &str,
    month: Month,
    source: GrantSource,
) -> QuotaResult<u32> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(ticket_count), 0) FROM bundle_grants
         WHERE company = ?1 AND month = ?2 AND source = ?3",
        params![company, month, source],
        |row| row.get(0),
    )?;
    Ok(u32::try_from(total.max(0)).unwrap_or(u32::MAX))
}

pub fn carry_exists(conn: &Connection, company: &str, month: Month) -> QuotaResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM bundle_grants
                       WHERE company = ?1 AND month = ?2 AND source = 'carry')",
        params![company, month],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Grants for a company, newest month first. `source = None` lists both kinds.
pub fn list_grants(
    conn: &Connection,
    company: &str,
    source: Option<GrantSource>,
) -> QuotaResult<Vec<BundleGrant>> {
    let mut stmt = conn.prepare(
        "SELECT id, company, month, ticket_count, source, created_at, added_by
         FROM bundle_grants
         WHERE company = ?1 AND (?2 IS NULL OR source = ?2)
         ORDER BY month DESC, id DESC",
    )?;
    let grants = stmt
        .query_map(params![company, source], |row| {
            let created_at: String = row.get(5)?;
            Ok(BundleGrant {
                id: row.get(0)?,
                company: row.get(1)?,
                month: row.get(2)?,
                ticket_count: row.get(3)?,
                source: row.get(4)?,
                created_at: from_sql_timestamp(5, &created_at)?,
                added_by: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(grants)
}
