//! Storage-bound quota engine.
//!
//! Every operation that may write quota state (carry rows, grace marker,
//! tickets) runs under the per-(company, month) lock and inside one IMMEDIATE
//! transaction, so a check and the write it guards cannot interleave with
//! another request for the same month.

use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{self, CompanyBinding, SupportPlan};
use crate::clock::Clock;
use crate::db::Database;
use crate::error::{QuotaError, QuotaResult};
use crate::ledger::{self, BundleGrant, GrantId, GrantSource};
use crate::locks::KeyedLocks;
use crate::month::Month;
use crate::notify::{Notification, NotificationSink, Requester};
use crate::quota::{self, Admission, Allowance, PreviousMonth, QuotaStatus};
use crate::tickets::{self, Identity, Ticket, TicketDraft, TicketKind, TicketStatus};
use crate::usage;

/// Bundle sizes customers may buy for themselves
pub const DEFAULT_PURCHASABLE_SIZES: [u32; 3] = [3, 5, 10];

/// Name recorded on grants made through the admin surface
pub const ADMIN_GRANTOR: &str = "Administrator";

/// Result of a successful service request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequestReceipt {
    pub ticket: Ticket,
    /// This ticket was the month's one-time extra SR
    pub consumed_grace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCounts {
    pub pending: u32,
    pub ongoing: u32,
    pub used_service_requests: u32,
    pub balance_service_requests: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyDetails {
    #[serde(flatten)]
    pub binding: CompanyBinding,
    pub bundles: Vec<BundleGrant>,
}

/// Carry row written while serving a call; announced after commit
#[derive(Debug, Clone, Copy)]
struct CarriedForward {
    id: GrantId,
    tickets: u32,
}

enum SrOutcome {
    Created { ticket: Ticket, consumed_grace: bool },
    Denied(Admission),
}

pub struct QuotaEngine {
    db: Database,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<(String, Month)>,
    notifier: NotificationSink,
    purchasable_sizes: Vec<u32>,
}

impl QuotaEngine {
    pub fn new(db: Database, clock: Arc<dyn Clock>, notifier: NotificationSink) -> Self {
        Self {
            db,
            clock,
            locks: KeyedLocks::new(),
            notifier,
            purchasable_sizes: DEFAULT_PURCHASABLE_SIZES.to_vec(),
        }
    }

    pub fn with_purchasable_sizes(mut self, sizes: Vec<u32>) -> Self {
        self.purchasable_sizes = sizes;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn purchasable_sizes(&self) -> &[u32] {
        &self.purchasable_sizes
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now().with_timezone(&Utc)
    }

    // ========================================================================
    // Quota
    // ========================================================================

    /// Roll unused manual grants of the previous month into `month`.
    /// Returns the new carry row, or `None` if nothing was written.
    pub async fn ensure_carry_forward(
        &self,
        company: &str,
        month: Month,
    ) -> QuotaResult<Option<GrantId>> {
        let _guard = self.locks.lock((company.to_string(), month)).await;
        let owned = company.to_string();
        let current = self.clock.current_month();
        let offset = self.clock.offset();
        let now = self.now_utc();
        let carried = self
            .db
            .transact(move |conn| {
                catalog::get_monthly_limit(conn, &owned)?;
                carry_forward(conn, &owned, month, current, offset, now)
            })
            .await?;
        self.announce_carry(company, month, carried);
        Ok(carried.map(|c| c.id))
    }

    /// Quota for any company-month. Months that have not started yet are
    /// reported from what is on the ledger today; nothing is carried into them.
    pub async fn quota_status(&self, company: &str, month: Month) -> QuotaResult<QuotaStatus> {
        let _guard = self.locks.lock((company.to_string(), month)).await;
        let owned = company.to_string();
        let current = self.clock.current_month();
        let offset = self.clock.offset();
        let now = self.now_utc();
        let (status, carried) = self
            .db
            .transact(move |conn| {
                let base = catalog::get_monthly_limit(conn, &owned)?;
                let carried = carry_forward(conn, &owned, month, current, offset, now)?;
                let (allowance, used) = load_allowance(conn, &owned, month, base, offset)?;
                Ok((QuotaStatus::new(owned, month, &allowance, used), carried))
            })
            .await?;
        self.announce_carry(company, month, carried);
        Ok(status)
    }

    /// Quota status for the caller's company in the current month.
    pub async fn current_status(&self, company: &str) -> QuotaResult<QuotaStatus> {
        self.quota_status(company, self.clock.current_month()).await
    }

    /// Evaluate admission without writing a ticket.
    pub async fn request_admission(
        &self,
        company: &str,
        month: Month,
        override_requested: bool,
    ) -> QuotaResult<Admission> {
        let _guard = self.locks.lock((company.to_string(), month)).await;
        let owned = company.to_string();
        let current = self.clock.current_month();
        let offset = self.clock.offset();
        let now = self.now_utc();
        let (admission, carried) = self
            .db
            .transact(move |conn| admit(conn, &owned, month, current, offset, now, override_requested))
            .await?;
        self.announce_carry(company, month, carried);
        Ok(admission)
    }

    fn announce_carry(&self, company: &str, month: Month, carried: Option<CarriedForward>) {
        if let Some(carried) = carried {
            self.notifier.emit(Notification::CarryForwarded {
                company: company.to_string(),
                month,
                tickets: carried.tickets,
            });
        }
    }

    // ========================================================================
    // Tickets
    // ========================================================================

    /// Create a service request in the current month, subject to quota.
    ///
    /// Denials come back as `GraceAvailable` (retry with `override_requested`)
    /// or `QuotaExhausted`. Carry rows and lazily created markers written
    /// while deciding are kept even when the request is denied.
    pub async fn create_service_request(
        &self,
        requester: &Identity,
        draft: TicketDraft,
        override_requested: bool,
    ) -> QuotaResult<ServiceRequestReceipt> {
        draft.validate()?;
        let local = self.clock.now();
        let now = local.with_timezone(&Utc);
        let month = Month::from_datetime(&local);
        let _guard = self.locks.lock((requester.company.clone(), month)).await;

        let mut attempt = 0;
        let (outcome, carried) = loop {
            match self
                .try_create_service_request(requester, &draft, month, now, override_requested)
                .await
            {
                Err(QuotaError::ConcurrentModification { .. }) if attempt == 0 => {
                    warn!(
                        "Grace marker for {} {} changed underneath us, re-evaluating",
                        requester.company, month
                    );
                    attempt += 1;
                }
                other => break other?,
            }
        };

        self.announce_carry(&requester.company, month, carried);
        match outcome {
            SrOutcome::Created {
                ticket,
                consumed_grace,
            } => {
                self.notifier.emit(Notification::ServiceRequestCreated {
                    company: ticket.requester_company.clone(),
                    ticket_id: ticket.id,
                    requester: Requester::of(&ticket),
                    subject: ticket.subject.clone(),
                });
                if consumed_grace {
                    self.notifier.emit(Notification::GraceConsumed {
                        company: ticket.requester_company.clone(),
                        month,
                        ticket_id: ticket.id,
                    });
                }
                Ok(ServiceRequestReceipt {
                    ticket,
                    consumed_grace,
                })
            }
            SrOutcome::Denied(admission) => {
                info!(
                    "SR denied for {} in {}: {:?}",
                    requester.company, month, admission
                );
                Err(admission
                    .into_result()
                    .err()
                    .unwrap_or(QuotaError::QuotaExhausted))
            }
        }
    }

    async fn try_create_service_request(
        &self,
        requester: &Identity,
        draft: &TicketDraft,
        month: Month,
        now: DateTime<Utc>,
        override_requested: bool,
    ) -> QuotaResult<(SrOutcome, Option<CarriedForward>)> {
        let requester = requester.clone();
        let draft = draft.clone();
        let offset = self.clock.offset();
        self.db
            .transact(move |conn| {
                let company = requester.company.as_str();
                let (admission, carried) =
                    admit(conn, company, month, month, offset, now, override_requested)?;
                let Admission::Allow { consumes_grace } = admission else {
                    return Ok((SrOutcome::Denied(admission), carried));
                };

                let ticket =
                    tickets::insert_ticket(conn, TicketKind::ServiceRequest, &draft, &requester, now)?;
                if consumes_grace && !usage::mark_grace_used(conn, company, month, now)? {
                    return Err(QuotaError::ConcurrentModification {
                        company: company.to_string(),
                        month: month.to_string(),
                    });
                }
                Ok((
                    SrOutcome::Created {
                        ticket,
                        consumed_grace: consumes_grace,
                    },
                    carried,
                ))
            })
            .await
    }

    /// Fault tickets are not quota-limited.
    pub async fn create_fault_ticket(
        &self,
        requester: &Identity,
        draft: TicketDraft,
    ) -> QuotaResult<Ticket> {
        let requester = requester.clone();
        let now = self.now_utc();
        let ticket = self
            .db
            .execute(move |conn| tickets::insert_ticket(conn, TicketKind::Fault, &draft, &requester, now))
            .await?;
        self.notifier.emit(Notification::FaultTicketCreated {
            company: ticket.requester_company.clone(),
            ticket_id: ticket.id,
            requester: Requester::of(&ticket),
            subject: ticket.subject.clone(),
        });
        Ok(ticket)
    }

    pub async fn get_ticket(&self, id: i64) -> QuotaResult<Ticket> {
        self.db
            .execute(move |conn| {
                tickets::get_ticket(conn, id)?
                    .ok_or_else(|| QuotaError::NotFound(format!("Ticket {}", id)))
            })
            .await
    }

    pub async fn assign_ticket(&self, id: i64, engineer: &str) -> QuotaResult<Ticket> {
        let engineer = engineer.to_string();
        let now = self.now_utc();
        let ticket = self
            .db
            .transact(move |conn| tickets::assign(conn, id, &engineer, now))
            .await?;
        self.notifier.emit(Notification::TicketAssigned {
            company: ticket.requester_company.clone(),
            ticket_id: ticket.id,
            requester: Requester::of(&ticket),
            subject: ticket.subject.clone(),
            engineer: ticket.engineer_name.clone().unwrap_or_default(),
        });
        Ok(ticket)
    }

    pub async fn close_ticket(&self, id: i64, comment: &str) -> QuotaResult<Ticket> {
        let comment = comment.to_string();
        let now = self.now_utc();
        let ticket = self
            .db
            .transact(move |conn| tickets::close(conn, id, &comment, now))
            .await?;
        self.notifier.emit(Notification::TicketClosed {
            company: ticket.requester_company.clone(),
            ticket_id: ticket.id,
            requester: Requester::of(&ticket),
            subject: ticket.subject.clone(),
            comment: ticket.work_done_comment.clone().unwrap_or_default(),
            duration_secs: ticket.duration_secs,
        });
        Ok(ticket)
    }

    /// Dashboard counters for the current month.
    pub async fn ticket_counts(&self, company: &str) -> QuotaResult<TicketCounts> {
        let status = self.current_status(company).await?;
        let company = company.to_string();
        let (pending, ongoing) = self
            .db
            .execute(move |conn| {
                Ok((
                    tickets::count_by_status(conn, &company, TicketStatus::Pending)?,
                    tickets::count_by_status(conn, &company, TicketStatus::Ongoing)?,
                ))
            })
            .await?;
        Ok(TicketCounts {
            pending,
            ongoing,
            used_service_requests: status.used,
            balance_service_requests: status.remaining,
        })
    }

    // ========================================================================
    // Bundles
    // ========================================================================

    /// Admin grant of extra SRs for an explicit month.
    pub async fn add_manual_bundle(
        &self,
        company: &str,
        month: Month,
        ticket_count: u32,
        added_by: &str,
    ) -> QuotaResult<GrantId> {
        self.grant(company, month, ticket_count, added_by, false).await
    }

    /// Self-service purchase for the caller's company in the current month.
    pub async fn purchase_bundle(
        &self,
        buyer: &Identity,
        ticket_count: u32,
    ) -> QuotaResult<GrantId> {
        if !self.purchasable_sizes.contains(&ticket_count) {
            return Err(QuotaError::InvalidBundle(format!(
                "bundle size must be one of {:?}",
                self.purchasable_sizes
            )));
        }
        let month = self.clock.current_month();
        self.grant(&buyer.company, month, ticket_count, &buyer.user, true)
            .await
    }

    async fn grant(
        &self,
        company: &str,
        month: Month,
        ticket_count: u32,
        added_by: &str,
        require_binding: bool,
    ) -> QuotaResult<GrantId> {
        let _guard = self.locks.lock((company.to_string(), month)).await;
        let owned_company = company.to_string();
        let owned_added_by = added_by.to_string();
        let now = self.now_utc();
        let (id, account_manager) = self
            .db
            .transact(move |conn| {
                let binding = catalog::get_binding(conn, &owned_company)?;
                if require_binding && binding.is_none() {
                    return Err(QuotaError::NotConfigured(owned_company));
                }
                let id = ledger::add_grant(
                    conn,
                    &owned_company,
                    month,
                    ticket_count,
                    GrantSource::Manual,
                    Some(&owned_added_by),
                    now,
                )?;
                Ok((id, binding.map(|b| b.account_manager)))
            })
            .await?;

        self.notifier.emit(Notification::BundleAdded {
            company: company.to_string(),
            month,
            tickets: ticket_count,
            added_by: added_by.to_string(),
            account_manager,
        });
        Ok(id)
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    pub async fn upsert_plan(&self, plan: SupportPlan) -> QuotaResult<()> {
        self.db
            .execute(move |conn| catalog::upsert_plan(conn, &plan))
            .await
    }

    pub async fn list_plans(&self) -> QuotaResult<Vec<SupportPlan>> {
        self.db.execute(catalog::list_plans).await
    }

    pub async fn register_company(&self, binding: CompanyBinding) -> QuotaResult<()> {
        let now = self.now_utc();
        self.db
            .transact(move |conn| catalog::register_company(conn, &binding, now))
            .await
    }

    pub async fn list_companies(&self) -> QuotaResult<Vec<CompanyBinding>> {
        self.db.execute(catalog::list_companies).await
    }

    /// Binding plus manual bundle history, newest month first.
    pub async fn company_details(&self, company: &str) -> QuotaResult<CompanyDetails> {
        let company = company.to_string();
        self.db
            .execute(move |conn| {
                let binding = catalog::get_binding(conn, &company)?
                    .ok_or_else(|| QuotaError::NotFound(format!("Company '{}'", company)))?;
                let bundles = ledger::list_grants(conn, &company, Some(GrantSource::Manual))?;
                Ok(CompanyDetails { binding, bundles })
            })
            .await
    }
}

/// Carry-forward step. The caller holds the month lock and an open
/// transaction, and has already checked the company is configured.
///
/// Only months up to `current` roll: for a later month the previous one is
/// still open and its usage is not final.
fn carry_forward(
    conn: &Connection,
    company: &str,
    month: Month,
    current: Month,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> QuotaResult<Option<CarriedForward>> {
    if month > current {
        debug!("[Carry Forward] {} {} has not started, nothing rolled", company, month);
        return Ok(None);
    }
    if ledger::carry_exists(conn, company, month)? {
        return Ok(None);
    }

    let prev_month = month.prev();
    let manual = ledger::sum_grants(conn, company, prev_month, GrantSource::Manual)?;
    if manual == 0 {
        return Ok(None);
    }
    let prev = PreviousMonth {
        base: catalog::get_monthly_limit(conn, company)?,
        manual,
        used: tickets::count_service_requests(conn, company, prev_month, offset)?,
        grace_used: usage::is_grace_used(conn, company, prev_month)?,
    };
    let leftover = quota::carry_leftover(&prev);
    debug!(
        "[Carry Forward] {} {}: prev base={} manual={} used={} grace={} -> leftover={}",
        company, prev_month, prev.base, prev.manual, prev.used, prev.grace_used, leftover
    );
    if leftover == 0 {
        return Ok(None);
    }
    Ok(ledger::insert_carry(conn, company, month, leftover, now)?
        .map(|id| CarriedForward { id, tickets: leftover }))
}

fn load_allowance(
    conn: &Connection,
    company: &str,
    month: Month,
    base: u32,
    offset: FixedOffset,
) -> QuotaResult<(Allowance, u32)> {
    let allowance = quota::compute_allowance(
        base,
        ledger::sum_grants(conn, company, month, GrantSource::Manual)?,
        ledger::sum_grants(conn, company, month, GrantSource::Carry)?,
        usage::is_grace_used(conn, company, month)?,
    );
    let used = tickets::count_service_requests(conn, company, month, offset)?;
    debug!(
        "[Quota] {} {}: base={} manual={} carry={} grace={} total={} used={}",
        company,
        month,
        allowance.base,
        allowance.manual,
        allowance.carry,
        allowance.grace_used,
        allowance.total_allowed(),
        used
    );
    Ok((allowance, used))
}

/// Admission decision. Writes at most the carry row and the usage marker.
fn admit(
    conn: &Connection,
    company: &str,
    month: Month,
    current: Month,
    offset: FixedOffset,
    now: DateTime<Utc>,
    override_requested: bool,
) -> QuotaResult<(Admission, Option<CarriedForward>)> {
    let base = catalog::get_monthly_limit(conn, company)?;
    let carried = carry_forward(conn, company, month, current, offset, now)?;
    let (allowance, used) = load_allowance(conn, company, month, base, offset)?;
    let admission = quota::decide(&allowance, used, override_requested);
    if matches!(admission, Admission::DenySoft { .. }) {
        usage::get_or_create(conn, company, month, now)?;
    }
    Ok((admission, carried))
}
