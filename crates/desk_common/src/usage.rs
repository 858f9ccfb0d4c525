//! Per company-month grace marker.
//!
//! `grace_used` only ever moves false -> true.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::to_sql_timestamp;
use crate::error::QuotaResult;
use crate::month::Month;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsageMarker {
    pub company: String,
    pub month: Month,
    pub grace_used: bool,
}

pub fn find(conn: &Connection, company: &str, month: Month) -> QuotaResult<Option<QuotaUsageMarker>> {
    Ok(conn
        .query_row(
            "SELECT company, month, grace_used FROM quota_usage WHERE company = ?1 AND month = ?2",
            params![company, month],
            |row| {
                Ok(QuotaUsageMarker {
                    company: row.get(0)?,
                    month: row.get(1)?,
                    grace_used: row.get(2)?,
                })
            },
        )
        .optional()?)
}

/// Fetch the marker, creating it with `grace_used = false` if absent.
pub fn get_or_create(
    conn: &Connection,
    company: &str,
    month: Month,
    now: DateTime<Utc>,
) -> QuotaResult<QuotaUsageMarker> {
    conn.execute(
        "INSERT OR IGNORE INTO quota_usage (company, month, grace_used, created_at)
         VALUES (?1, ?2, 0, ?3)",
        params![company, month, to_sql_timestamp(&now)],
    )?;
    Ok(QuotaUsageMarker {
        company: company.to_string(),
        month,
        grace_used: is_grace_used(conn, company, month)?,
    })
}

pub fn is_grace_used(conn: &Connection, company: &str, month: Month) -> QuotaResult<bool> {
    Ok(find(conn, company, month)?.is_some_and(|m| m.grace_used))
}

/// Set `grace_used`. Idempotent; returns `true` only for the call that
/// performed the false -> true transition.
pub fn mark_grace_used(
    conn: &Connection,
    company: &str,
    month: Month,
    now: DateTime<Utc>,
) -> QuotaResult<bool> {
    let ts = to_sql_timestamp(&now);
    let changed = conn.execute(
        "INSERT INTO quota_usage (company, month, grace_used, created_at, grace_used_at)
         VALUES (?1, ?2, 1, ?3, ?3)
         ON CONFLICT(company, month) DO UPDATE
            SET grace_used = 1, grace_used_at = excluded.grace_used_at
            WHERE grace_used = 0",
        params![company, month, ts],
    )?;
    if changed > 0 {
        info!("Grace SR consumed by {} for {}", company, month);
    }
    Ok(changed > 0)
}
