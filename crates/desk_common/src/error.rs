//! Error types for the quota subsystem.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Support plan for company '{0}' is not configured.")]
    NotConfigured(String),

    #[error(
        "Your monthly SR quota including purchased bundles is exhausted, and your one-time \
         extra SR has already been used. Purchase an additional ticket bundle to continue."
    )]
    QuotaExhausted,

    #[error(
        "Your monthly SR quota is exhausted. You may submit ONE extra SR for this month by \
         confirming the override. After this, you must purchase extra ticket bundles."
    )]
    GraceAvailable,

    /// Another writer changed the quota state between our read and our write.
    /// Handled inside the engine; never reaches callers.
    #[error("Concurrent modification of quota state for {company} {month}")]
    ConcurrentModification { company: String, month: String },

    #[error("Invalid month '{0}', expected YYYY-MM")]
    InvalidMonth(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Invalid ticket: {0}")]
    InvalidTicket(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("Ticket {id} cannot move from {from} to {to}")]
    InvalidTransition { id: i64, from: String, to: String },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl QuotaError {
    /// Stable machine-readable code used by the HTTP layer and CLI.
    pub fn code(&self) -> &'static str {
        match self {
            QuotaError::NotConfigured(_) => "NOT_CONFIGURED",
            QuotaError::QuotaExhausted => "QUOTA_EXHAUSTED",
            QuotaError::GraceAvailable => "GRACE_AVAILABLE",
            QuotaError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            QuotaError::InvalidMonth(_) => "INVALID_MONTH",
            QuotaError::InvalidConfig(_) => "INVALID_CONFIG",
            QuotaError::InvalidBundle(_) => "INVALID_BUNDLE",
            QuotaError::InvalidTicket(_) => "INVALID_TICKET",
            QuotaError::NotFound(_) => "NOT_FOUND",
            QuotaError::Conflict(_) => "CONFLICT",
            QuotaError::InvalidTransition { .. } => "INVALID_TRANSITION",
            QuotaError::Storage(_) => "STORAGE_ERROR",
            QuotaError::Io(_) => "IO_ERROR",
            QuotaError::Task(_) => "INTERNAL_ERROR",
        }
    }
}

pub type QuotaResult<T> = Result<T, QuotaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_mentions_bundles_and_extra() {
        let msg = QuotaError::QuotaExhausted.to_string();
        assert!(msg.contains("bundles"));
        assert!(msg.contains("already been used"));
    }

    #[test]
    fn test_codes() {
        assert_eq!(QuotaError::GraceAvailable.code(), "GRACE_AVAILABLE");
        assert_eq!(
            QuotaError::NotConfigured("acme".into()).code(),
            "NOT_CONFIGURED"
        );
    }
}
