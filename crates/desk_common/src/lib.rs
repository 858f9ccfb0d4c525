//! Shared types, storage and the service-request quota engine for deskd and deskctl.

pub mod catalog;
pub mod clock;
pub mod db;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod month;
pub mod notify;
pub mod quota;
pub mod tickets;
pub mod usage;

pub use catalog::{CompanyBinding, SupportPlan};
pub use clock::{Clock, FixedClock, SystemClock, DEFAULT_UTC_OFFSET_MINUTES};
pub use db::Database;
pub use engine::{
    CompanyDetails, QuotaEngine, ServiceRequestReceipt, TicketCounts, ADMIN_GRANTOR,
    DEFAULT_PURCHASABLE_SIZES,
};
pub use error::{QuotaError, QuotaResult};
pub use ledger::{BundleGrant, GrantId, GrantSource};
pub use month::Month;
pub use notify::{Envelope, Notification, NotificationSink, Requester};
pub use quota::{Admission, Allowance, Attribution, DenyReason, QuotaStatus};
pub use tickets::{Identity, Ticket, TicketDraft, TicketKind, TicketStatus};

/// Version reported by the daemon and CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default daemon address
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7870";

/// Header carrying the authenticated caller's company
pub const COMPANY_HEADER: &str = "x-desk-company";

/// Header carrying the authenticated caller's user name
pub const USER_HEADER: &str = "x-desk-user";
