//! Notification events.
//!
//! Producers emit after their transaction commits; delivery happens on a
//! separate task, so a slow or failing channel never touches quota state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ledger::GrantSource;
use crate::month::Month;
use crate::tickets::Ticket;

/// Who opened a ticket, as carried on ticket events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Requester {
    pub fn of(ticket: &Ticket) -> Self {
        Self {
            name: ticket.requester_name.clone(),
            email: ticket.requester_email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// Extra SRs granted; goes to the account manager and the company's customers
    BundleAdded {
        company: String,
        month: Month,
        tickets: u32,
        added_by: String,
        account_manager: Option<String>,
    },
    /// Unused bundle tickets rolled into a new month
    CarryForwarded {
        company: String,
        month: Month,
        tickets: u32,
    },
    GraceConsumed {
        company: String,
        month: Month,
        ticket_id: i64,
    },
    ServiceRequestCreated {
        company: String,
        ticket_id: i64,
        requester: Requester,
        subject: String,
    },
    FaultTicketCreated {
        company: String,
        ticket_id: i64,
        requester: Requester,
        subject: String,
    },
    TicketAssigned {
        company: String,
        ticket_id: i64,
        requester: Requester,
        subject: String,
        engineer: String,
    },
    TicketClosed {
        company: String,
        ticket_id: i64,
        requester: Requester,
        subject: String,
        comment: String,
        duration_secs: Option<i64>,
    },
}

impl Notification {
    pub fn company(&self) -> &str {
        match self {
            Notification::BundleAdded { company, .. }
            | Notification::CarryForwarded { company, .. }
            | Notification::GraceConsumed { company, .. }
            | Notification::ServiceRequestCreated { company, .. }
            | Notification::FaultTicketCreated { company, .. }
            | Notification::TicketAssigned { company, .. }
            | Notification::TicketClosed { company, .. } => company,
        }
    }

    /// Ledger source for events that appended a bundle row
    pub fn grant_source(&self) -> Option<GrantSource> {
        match self {
            Notification::BundleAdded { .. } => Some(GrantSource::Manual),
            Notification::CarryForwarded { .. } => Some(GrantSource::Carry),
            _ => None,
        }
    }

    /// Short human-readable line for log delivery
    pub fn summary(&self) -> String {
        match self {
            Notification::BundleAdded {
                company,
                month,
                tickets,
                added_by,
                ..
            } => format!(
                "{} additional SR tickets added to {} for {} by {}",
                tickets, company, month, added_by
            ),
            Notification::CarryForwarded {
                company,
                month,
                tickets,
            } => format!(
                "{} unused bundle tickets carried into {} for {}",
                tickets, month, company
            ),
            Notification::GraceConsumed { company, month, ticket_id } => format!(
                "{} used its one-time extra SR for {} (ticket #{})",
                company, month, ticket_id
            ),
            Notification::ServiceRequestCreated {
                company,
                ticket_id,
                requester,
                subject,
            } => format!(
                "New service request #{} from {} ({}): {}",
                ticket_id, requester.name, company, subject
            ),
            Notification::FaultTicketCreated {
                company,
                ticket_id,
                requester,
                subject,
            } => format!(
                "New fault ticket #{} from {} ({}): {}",
                ticket_id, requester.name, company, subject
            ),
            Notification::TicketAssigned {
                ticket_id,
                subject,
                engineer,
                ..
            } => format!("Ticket #{} ({}) assigned to {}", ticket_id, subject, engineer),
            Notification::TicketClosed {
                ticket_id, subject, ..
            } => format!("Ticket #{} ({}) closed", ticket_id, subject),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub notification: Notification,
}

impl Envelope {
    pub fn new(notification: Notification) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            notification,
        }
    }
}

/// Sending half handed to the engine. Never blocks, never fails the caller.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: Option<mpsc::UnboundedSender<Envelope>>,
}

impl NotificationSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, notification: Notification) {
        let Some(tx) = &self.tx else {
            debug!("Notification dropped (dispatch disabled): {}", notification.summary());
            return;
        };
        if let Err(e) = tx.send(Envelope::new(notification)) {
            warn!(
                "Notification dispatcher is gone, dropping: {}",
                e.0.notification.summary()
            );
        }
    }
}
