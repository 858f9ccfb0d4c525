//! Prometheus metrics for deskd

use desk_common::{Admission, QuotaError};
use prometheus::{
    register_int_counter_vec_with_registry, Encoder, IntCounterVec, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeskMetrics {
    /// Admission decisions by outcome
    pub admissions_total: IntCounterVec,
    /// Ledger appends by source
    pub bundle_grants_total: IntCounterVec,
    /// Notification deliveries by result
    pub notifications_total: IntCounterVec,

    registry: Arc<Registry>,
}

impl DeskMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let admissions_total = register_int_counter_vec_with_registry!(
            "deskd_admissions_total",
            "Service request admission decisions by outcome",
            &["outcome"],
            registry
        )?;

        let bundle_grants_total = register_int_counter_vec_with_registry!(
            "deskd_bundle_grants_total",
            "Bundle grants appended to the ledger by source",
            &["source"],
            registry
        )?;

        let notifications_total = register_int_counter_vec_with_registry!(
            "deskd_notifications_total",
            "Notification deliveries by result",
            &["result"],
            registry
        )?;

        Ok(Self {
            admissions_total,
            bundle_grants_total,
            notifications_total,
            registry: Arc::new(registry),
        })
    }

    pub fn record_admission(&self, admission: &Admission) {
        let outcome = match admission {
            Admission::Allow {
                consumes_grace: false,
            } => "allow",
            Admission::Allow {
                consumes_grace: true,
            } => "allow_grace",
            Admission::DenySoft { .. } => "grace_available",
            Admission::DenyHard { .. } => "quota_exhausted",
        };
        self.admissions_total.with_label_values(&[outcome]).inc();
    }

    /// Record a failed admission. Errors other than quota denials are not counted.
    pub fn record_admission_error(&self, err: &QuotaError) {
        let outcome = match err {
            QuotaError::GraceAvailable => "grace_available",
            QuotaError::QuotaExhausted => "quota_exhausted",
            QuotaError::NotConfigured(_) => "not_configured",
            _ => return,
        };
        self.admissions_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_bundle(&self, source: &str) {
        self.bundle_grants_total.with_label_values(&[source]).inc();
    }

    pub fn record_notification(&self, result: &str) {
        self.notifications_total.with_label_values(&[result]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_counters() {
        let metrics = DeskMetrics::new().unwrap();
        metrics.record_admission(&Admission::Allow {
            consumes_grace: true,
        });
        metrics.record_admission_error(&QuotaError::NotConfigured("Acme".into()));
        metrics.record_bundle("manual");
        metrics.record_notification("delivered");

        let text = metrics.export().unwrap();
        assert!(text.contains("deskd_admissions_total{outcome=\"allow_grace\"} 1"));
        assert!(text.contains("deskd_admissions_total{outcome=\"not_configured\"} 1"));
        assert!(text.contains("deskd_bundle_grants_total{source=\"manual\"} 1"));
        assert!(text.contains("deskd_notifications_total{result=\"delivered\"} 1"));
    }

    #[test]
    fn test_storage_errors_are_not_admissions() {
        let metrics = DeskMetrics::new().unwrap();
        metrics.record_admission_error(&QuotaError::InvalidTicket("x".into()));
        assert!(!metrics.export().unwrap().contains("outcome="));
    }
}
