//! Ticket store: service requests and fault tickets, and the monthly SR counter.

use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::db::{from_sql_timestamp, from_sql_timestamp_opt, to_sql_timestamp};
use crate::error::{QuotaError, QuotaResult};
use crate::month::Month;

/// Caller identity as resolved by the authentication layer. Trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub company: String,
    pub user: String,
}

impl Identity {
    pub fn new(company: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            user: user.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketKind {
    /// Quota-limited
    #[serde(rename = "Service Request")]
    ServiceRequest,
    /// Incident ticket, never counted against quota
    #[serde(rename = "Fault")]
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Pending,
    Ongoing,
    Closed,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = QuotaError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(QuotaError::InvalidTicket(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: QuotaError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum!(TicketKind {
    ServiceRequest => "Service Request",
    Fault => "Fault",
});

text_enum!(TicketStatus {
    Pending => "Pending",
    Ongoing => "Ongoing",
    Closed => "Closed",
});

/// Fields a requester supplies when opening a ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketDraft {
    pub subject: String,
    pub description: String,
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_email: Option<String>,
}

impl TicketDraft {
    pub fn validate(&self) -> QuotaResult<()> {
        if self.subject.trim().is_empty()
            || self.description.trim().is_empty()
            || self.priority.trim().is_empty()
        {
            return Err(QuotaError::InvalidTicket("Missing required fields".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub subject: String,
    pub kind: TicketKind,
    pub description: String,
    pub priority: String,
    pub requester_name: String,
    pub requester_company: String,
    pub requester_email: Option<String>,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub engineer_name: Option<String>,
    pub work_done_comment: Option<String>,
    pub duration_secs: Option<i64>,
}

const TICKET_COLUMNS: &str = "id, subject, kind, description, priority, requester_name,
    requester_company, requester_email, status, created_at, assigned_at, closed_at,
    engineer_name, work_done_comment, duration_secs";

fn ticket_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Ticket> {
    let created_at: String = row.get(9)?;
    Ok(Ticket {
        id: row.get(0)?,
        subject: row.get(1)?,
        kind: row.get(2)?,
        description: row.get(3)?,
        priority: row.get(4)?,
        requester_name: row.get(5)?,
        requester_company: row.get(6)?,
        requester_email: row.get(7)?,
        status: row.get(8)?,
        created_at: from_sql_timestamp(9, &created_at)?,
        assigned_at: from_sql_timestamp_opt(10, row.get(10)?)?,
        closed_at: from_sql_timestamp_opt(11, row.get(11)?)?,
        engineer_name: row.get(12)?,
        work_done_comment: row.get(13)?,
        duration_secs: row.get(14)?,
    })
}

pub fn insert_ticket(
    conn: &Connection,
    kind: TicketKind,
    draft: &TicketDraft,
    requester: &Identity,
    created_at: DateTime<Utc>,
) -> QuotaResult<Ticket> {
    draft.validate()?;
    conn.execute(
        "INSERT INTO tickets
            (subject, kind, description, priority, requester_name, requester_company,
             requester_email, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            draft.subject,
            kind,
            draft.description,
            draft.priority,
            requester.user,
            requester.company,
            draft.requester_email,
            TicketStatus::Pending,
            to_sql_timestamp(&created_at),
        ],
    )?;
    let id = conn.last_insert_rowid();
    info!("{} #{} opened by {} ({})", kind, id, requester.user, requester.company);
    get_ticket(conn, id)?.ok_or_else(|| QuotaError::NotFound(format!("Ticket {}", id)))
}

pub fn get_ticket(conn: &Connection, id: i64) -> QuotaResult<Option<Ticket>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS),
            params![id],
            ticket_from_row,
        )
        .optional()?)
}

/// Service requests opened by `company` within `month`, where the month is
/// read in the civil `offset`.
pub fn count_service_requests(
    conn: &Connection,
    company: &str,
    month: Month,
    offset: FixedOffset,
) -> QuotaResult<u32> {
    let (start, end) = month.bounds_utc(offset);
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM tickets
         WHERE requester_company = ?1 AND kind = ?2
           AND created_at >= ?3 AND created_at < ?4",
        params![
            company,
            TicketKind::ServiceRequest,
            to_sql_timestamp(&start),
            to_sql_timestamp(&end)
        ],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn count_by_status(conn: &Connection, company: &str, status: TicketStatus) -> QuotaResult<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM tickets WHERE requester_company = ?1 AND status = ?2",
        params![company, status],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn require(conn: &Connection, id: i64) -> QuotaResult<Ticket> {
    get_ticket(conn, id)?.ok_or_else(|| QuotaError::NotFound(format!("Ticket {}", id)))
}

fn invalid_transition(ticket: &Ticket, to: TicketStatus) -> QuotaError {
    QuotaError::InvalidTransition {
        id: ticket.id,
        from: ticket.status.to_string(),
        to: to.to_string(),
    }
}

/// Pending -> Ongoing
pub fn assign(conn: &Connection, id: i64, engineer: &str, now: DateTime<Utc>) -> QuotaResult<Ticket> {
    let ticket = require(conn, id)?;
    if ticket.status != TicketStatus::Pending {
        return Err(invalid_transition(&ticket, TicketStatus::Ongoing));
    }
    conn.execute(
        "UPDATE tickets SET status = ?1, engineer_name = ?2, assigned_at = ?3 WHERE id = ?4",
        params![TicketStatus::Ongoing, engineer, to_sql_timestamp(&now), id],
    )?;
    info!("Ticket #{} assigned to {}", id, engineer);
    require(conn, id)
}

/// Ongoing -> Closed, recording how long the engineer held it.
pub fn close(conn: &Connection, id: i64, comment: &str, now: DateTime<Utc>) -> QuotaResult<Ticket> {
    let ticket = require(conn, id)?;
    if ticket.status != TicketStatus::Ongoing {
        return Err(invalid_transition(&ticket, TicketStatus::Closed));
    }
    let duration = ticket
        .assigned_at
        .map(|assigned| (now - assigned).num_seconds().max(0));
    conn.execute(
        "UPDATE tickets SET status = ?1, closed_at = ?2, work_done_comment = ?3, duration_secs = ?4
         WHERE id = ?5",
        params![TicketStatus::Closed, to_sql_timestamp(&now), comment, duration, id],
    )?;
    info!("Ticket #{} closed", id);
    require(conn, id)
}
