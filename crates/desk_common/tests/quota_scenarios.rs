//! End-to-end quota behaviour against an on-disk database.

use chrono::{Duration, FixedOffset};
use desk_common::{
    Admission, Clock, CompanyBinding, Database, DenyReason, FixedClock, GrantSource, Identity, Month,
    NotificationSink, QuotaEngine, QuotaError, SupportPlan, TicketDraft, ADMIN_GRANTOR,
    DEFAULT_UTC_OFFSET_MINUTES,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn colombo() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60).unwrap()
}

fn month(s: &str) -> Month {
    s.parse().unwrap()
}

fn draft(n: u32) -> TicketDraft {
    TicketDraft {
        subject: format!("Request {}", n),
        description: "Firewall rule change".into(),
        priority: "Low".into(),
        requester_email: Some("kasun@acme.lk".into()),
    }
}

fn acme() -> Identity {
    Identity::new("Acme", "kasun")
}

async fn engine_at(path: &Path, clock: Arc<FixedClock>) -> QuotaEngine {
    let db = Database::open(path).await.unwrap();
    QuotaEngine::new(db, clock, NotificationSink::disabled())
}

async fn configure(engine: &QuotaEngine, company: &str, limit: u32) {
    engine
        .upsert_plan(SupportPlan {
            name: "Standard".into(),
            monthly_limit: limit,
        })
        .await
        .unwrap();
    engine
        .register_company(CompanyBinding {
            company: company.into(),
            plan_name: "Standard".into(),
            account_manager: "Nimal".into(),
            location: "Colombo 07".into(),
            contact_person: "Ruwan".into(),
            contact_mobile: "0771234567".into(),
        })
        .await
        .unwrap();
}

async fn fill(engine: &QuotaEngine, n: u32) {
    for i in 0..n {
        engine
            .create_service_request(&acme(), draft(i), false)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn grace_flow_with_base_five() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::at_month(month("2024-06"), 10, colombo()));
    let engine = engine_at(&dir.path().join("desk.db"), clock).await;
    configure(&engine, "Acme", 5).await;
    fill(&engine, 5).await;

    let err = engine
        .create_service_request(&acme(), draft(6), false)
        .await
        .unwrap_err();
    assert!(matches!(err, QuotaError::GraceAvailable));

    let receipt = engine
        .create_service_request(&acme(), draft(6), true)
        .await
        .unwrap();
    assert!(receipt.consumed_grace);

    let status = engine.quota_status("Acme", month("2024-06")).await.unwrap();
    assert!(status.grace_used);
    assert_eq!(status.used, 6);
    assert_eq!(status.total_allowed, 6);
    assert_eq!(status.remaining, 0);

    for override_requested in [false, true] {
        let err = engine
            .create_service_request(&acme(), draft(7), override_requested)
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::QuotaExhausted));
    }
}

#[tokio::test]
async fn manual_bundle_extends_allowance() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::at_month(month("2024-06"), 20, colombo()));
    let engine = engine_at(&dir.path().join("desk.db"), clock).await;
    configure(&engine, "Acme", 10).await;
    engine
        .add_manual_bundle("Acme", month("2024-06"), 3, ADMIN_GRANTOR)
        .await
        .unwrap();
    fill(&engine, 8).await;

    let status = engine.quota_status("Acme", month("2024-06")).await.unwrap();
    assert_eq!(status.total_allowed, 13);
    assert_eq!(status.remaining, 5);
    assert!(!status.grace_used);

    let decision = engine
        .request_admission("Acme", month("2024-06"), false)
        .await
        .unwrap();
    assert_eq!(
        decision,
        Admission::Allow {
            consumes_grace: false
        }
    );
}

#[tokio::test]
async fn unused_bundle_carries_forward_once() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::at_month(month("2024-05"), 12, colombo()));
    let engine = engine_at(&dir.path().join("desk.db"), Arc::clone(&clock)).await;
    configure(&engine, "Acme", 5).await;
    engine
        .add_manual_bundle("Acme", month("2024-05"), 3, ADMIN_GRANTOR)
        .await
        .unwrap();
    // Base of 5 plus 2 of the 3 bundle tickets
    fill(&engine, 7).await;

    clock.advance(Duration::days(30));
    assert_eq!(engine.clock().current_month(), month("2024-06"));

    let first = engine
        .ensure_carry_forward("Acme", month("2024-06"))
        .await
        .unwrap();
    assert!(first.is_some());
    let again = engine
        .ensure_carry_forward("Acme", month("2024-06"))
        .await
        .unwrap();
    assert!(again.is_none());

    let status = engine.quota_status("Acme", month("2024-06")).await.unwrap();
    assert_eq!(status.carry, 1);
    assert_eq!(status.total_allowed, 6);

    let carry_rows: u32 = engine
        .database()
        .execute(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM bundle_grants
                 WHERE company = 'Acme' AND month = '2024-06' AND source = 'carry'",
                [],
                |row| row.get(0),
            )?)
        })
        .await
        .unwrap();
    assert_eq!(carry_rows, 1);
}

#[tokio::test]
async fn carried_tickets_do_not_roll_twice() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::at_month(month("2024-05"), 12, colombo()));
    let engine = engine_at(&dir.path().join("desk.db"), Arc::clone(&clock)).await;
    configure(&engine, "Acme", 2).await;
    engine
        .add_manual_bundle("Acme", month("2024-05"), 4, ADMIN_GRANTOR)
        .await
        .unwrap();

    // Nothing used in May: June gets 4 carried tickets
    clock.advance(Duration::days(30));
    let june = engine.current_status("Acme").await.unwrap();
    assert_eq!(june.month, month("2024-06"));
    assert_eq!(june.carry, 4);

    // June has no manual grants of its own, so July gets nothing
    clock.advance(Duration::days(30));
    let july = engine.current_status("Acme").await.unwrap();
    assert_eq!(july.month, month("2024-07"));
    assert_eq!(july.carry, 0);
    assert_eq!(july.total_allowed, 2);
}

#[tokio::test]
async fn looking_ahead_does_not_freeze_next_months_carry() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::at_month(month("2024-06"), 5, colombo()));
    let engine = engine_at(&dir.path().join("desk.db"), Arc::clone(&clock)).await;
    configure(&engine, "Acme", 2).await;
    engine
        .add_manual_bundle("Acme", month("2024-06"), 3, ADMIN_GRANTOR)
        .await
        .unwrap();

    // Peeking at July while June is still running
    let peek = engine.quota_status("Acme", month("2024-07")).await.unwrap();
    assert_eq!(peek.carry, 0);
    let admission = engine
        .request_admission("Acme", month("2024-07"), false)
        .await
        .unwrap();
    assert!(admission.is_allowed());

    // June then uses its base and the whole bundle
    fill(&engine, 5).await;

    clock.advance(Duration::days(30));
    let july = engine.current_status("Acme").await.unwrap();
    assert_eq!(july.month, month("2024-07"));
    assert_eq!(july.carry, 0);
    assert_eq!(july.total_allowed, 2);
}

#[tokio::test]
async fn unconfigured_company_writes_nothing() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::at_month(month("2024-06"), 1, colombo()));
    let engine = engine_at(&dir.path().join("desk.db"), clock).await;

    let err = engine
        .request_admission("Ghost", month("2024-06"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, QuotaError::NotConfigured(ref c) if c == "Ghost"));

    let err = engine
        .create_service_request(&Identity::new("Ghost", "x"), draft(1), true)
        .await
        .unwrap_err();
    assert!(matches!(err, QuotaError::NotConfigured(_)));

    let rows: i64 = engine
        .database()
        .execute(|conn| {
            Ok(conn.query_row(
                "SELECT (SELECT COUNT(*) FROM bundle_grants)
                      + (SELECT COUNT(*) FROM quota_usage)
                      + (SELECT COUNT(*) FROM tickets)",
                [],
                |row| row.get(0),
            )?)
        })
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
async fn soft_deny_creates_marker_without_grace() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::at_month(month("2024-06"), 3, colombo()));
    let engine = engine_at(&dir.path().join("desk.db"), clock).await;
    configure(&engine, "Acme", 0).await;

    let decision = engine
        .request_admission("Acme", month("2024-06"), false)
        .await
        .unwrap();
    assert_eq!(
        decision,
        Admission::DenySoft {
            reason: DenyReason::GraceAvailable
        }
    );

    let (markers, grace): (i64, i64) = engine
        .database()
        .execute(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(grace_used), 0) FROM quota_usage",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })
        .await
        .unwrap();
    assert_eq!((markers, grace), (1, 0));
}

#[tokio::test]
async fn grace_is_per_month() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::at_month(month("2024-06"), 28, colombo()));
    let engine = engine_at(&dir.path().join("desk.db"), Arc::clone(&clock)).await;
    configure(&engine, "Acme", 1).await;
    fill(&engine, 1).await;
    assert!(
        engine
            .create_service_request(&acme(), draft(2), true)
            .await
            .unwrap()
            .consumed_grace
    );

    clock.advance(Duration::days(5));
    let july = engine.current_status("Acme").await.unwrap();
    assert_eq!(july.month, month("2024-07"));
    assert!(!july.grace_used);
    assert_eq!(july.used, 0);
    // June's grace is still recorded
    let june = engine.quota_status("Acme", month("2024-06")).await.unwrap();
    assert!(june.grace_used);
    assert_eq!(
        june.attribution.from_grace, 1,
        "extra SR attributed after base"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overrides_consume_grace_once() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::at_month(month("2024-06"), 15, colombo()));
    let engine = Arc::new(engine_at(&dir.path().join("desk.db"), clock).await);
    configure(&engine, "Acme", 3).await;
    fill(&engine, 3).await;

    let mut handles = Vec::new();
    for i in 0..2 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine.create_service_request(&acme(), draft(10 + i), true).await
        }));
    }
    let mut allowed = 0;
    let mut exhausted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(receipt) => {
                assert!(receipt.consumed_grace);
                allowed += 1;
            }
            Err(QuotaError::QuotaExhausted) => exhausted += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!((allowed, exhausted), (1, 1));

    let status = engine.quota_status("Acme", month("2024-06")).await.unwrap();
    assert_eq!(status.used, 4);
    assert!(status.grace_used);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_write_one_carry_row() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::at_month(month("2024-06"), 2, colombo()));
    let engine = Arc::new(engine_at(&dir.path().join("desk.db"), clock).await);
    configure(&engine, "Acme", 5).await;
    engine
        .add_manual_bundle("Acme", month("2024-05"), 5, ADMIN_GRANTOR)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                engine.quota_status("Acme", month("2024-06")).await.map(|s| s.carry)
            } else {
                engine
                    .ensure_carry_forward("Acme", month("2024-06"))
                    .await
                    .map(|_| 5)
            }
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap(), 5);
    }

    let (rows, total): (u32, u32) = engine
        .database()
        .execute(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(ticket_count), 0) FROM bundle_grants
                 WHERE company = 'Acme' AND month = '2024-06' AND source = 'carry'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })
        .await
        .unwrap();
    assert_eq!((rows, total), (1, 5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn separate_connections_serialize_on_the_database() {
    // Two engines share the file but not the in-process locks
    let dir = tempdir().unwrap();
    let path = dir.path().join("desk.db");
    let clock = Arc::new(FixedClock::at_month(month("2024-06"), 15, colombo()));
    let a = Arc::new(engine_at(&path, Arc::clone(&clock)).await);
    let b = Arc::new(engine_at(&path, clock).await);
    configure(&a, "Acme", 2).await;
    fill(&a, 2).await;

    let ha = {
        let a = Arc::clone(&a);
        tokio::spawn(async move { a.create_service_request(&acme(), draft(1), true).await })
    };
    let hb = {
        let b = Arc::clone(&b);
        tokio::spawn(async move { b.create_service_request(&acme(), draft(2), true).await })
    };
    let results = [ha.await.unwrap(), hb.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(QuotaError::QuotaExhausted))));

    let status = b.quota_status("Acme", month("2024-06")).await.unwrap();
    assert_eq!(status.used, 3);
}

#[tokio::test]
async fn bundle_history_is_append_only() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(FixedClock::at_month(month("2024-06"), 15, colombo()));
    let engine = engine_at(&dir.path().join("desk.db"), clock).await;
    configure(&engine, "Acme", 5).await;

    let first = engine
        .add_manual_bundle("Acme", month("2024-06"), 3, ADMIN_GRANTOR)
        .await
        .unwrap();
    let second = engine.purchase_bundle(&acme(), 3).await.unwrap();
    assert_ne!(first, second);

    let details = engine.company_details("Acme").await.unwrap();
    assert_eq!(details.bundles.len(), 2);
    assert!(details
        .bundles
        .iter()
        .any(|b| b.added_by.as_deref() == Some("kasun") && b.source == GrantSource::Manual));

    let err = engine
        .add_manual_bundle("Acme", month("2024-06"), 0, ADMIN_GRANTOR)
        .await
        .unwrap_err();
    assert!(matches!(err, QuotaError::InvalidBundle(_)));
}
