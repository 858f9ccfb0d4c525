//! Quota arithmetic.
//!
//! Everything here is a pure function of aggregate counts. The month state
//! (unused, within limit, grace available, grace consumed, exhausted) is never
//! stored; it falls out of [`Allowance`] and the used count every time.

use serde::{Deserialize, Serialize};

use crate::error::QuotaError;
use crate::month::Month;

/// Allowance breakdown for one company-month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Allowance {
    pub base: u32,
    pub manual: u32,
    pub carry: u32,
    pub grace_used: bool,
}

impl Allowance {
    /// Allowance before the one-time extra SR
    pub fn pre_grace(&self) -> u32 {
        self.base
            .saturating_add(self.manual)
            .saturating_add(self.carry)
    }

    pub fn grace(&self) -> u32 {
        u32::from(self.grace_used)
    }

    pub fn total_allowed(&self) -> u32 {
        self.pre_grace().saturating_add(self.grace())
    }
}

pub fn compute_allowance(base: u32, manual: u32, carry: u32, grace_used: bool) -> Allowance {
    Allowance {
        base,
        manual,
        carry,
        grace_used,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    GraceAvailable,
    QuotaExhausted,
}

impl From<DenyReason> for QuotaError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::GraceAvailable => QuotaError::GraceAvailable,
            DenyReason::QuotaExhausted => QuotaError::QuotaExhausted,
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Admission {
    /// Create the ticket. `consumes_grace` means this ticket is the
    /// month's one-time extra SR.
    Allow { consumes_grace: bool },
    /// Retrying with override set will succeed
    DenySoft { reason: DenyReason },
    DenyHard { reason: DenyReason },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow { .. })
    }

    pub fn into_result(self) -> Result<bool, QuotaError> {
        match self {
            Admission::Allow { consumes_grace } => Ok(consumes_grace),
            Admission::DenySoft { reason } | Admission::DenyHard { reason } => Err(reason.into()),
        }
    }
}

/// Decide whether one more SR may be created given `used` SRs so far this month.
pub fn decide(allowance: &Allowance, used: u32, override_requested: bool) -> Admission {
    if used < allowance.total_allowed() {
        return Admission::Allow {
            consumes_grace: false,
        };
    }
    if allowance.grace_used {
        return Admission::DenyHard {
            reason: DenyReason::QuotaExhausted,
        };
    }
    if !override_requested {
        return Admission::DenySoft {
            reason: DenyReason::GraceAvailable,
        };
    }
    Admission::Allow {
        consumes_grace: used >= allowance.pre_grace(),
    }
}

/// Previous month's aggregates, as needed for carry-forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreviousMonth {
    pub base: u32,
    pub manual: u32,
    pub used: u32,
    pub grace_used: bool,
}

/// Unused manual grants that roll into the next month.
///
/// SRs are charged against the base limit and the grace ticket first; only
/// the excess eats into manual bundles. Carry rows of the previous month are
/// not an input, so nothing rolls more than once.
pub fn carry_leftover(prev: &PreviousMonth) -> u32 {
    let used_against_additional = prev
        .used
        .saturating_sub(prev.base)
        .saturating_sub(u32::from(prev.grace_used));
    prev.manual.saturating_sub(used_against_additional)
}

/// How the used SRs split across the allowance layers, filled in order
/// base, manual, carry, grace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attribution {
    pub from_base: u32,
    pub from_manual: u32,
    pub from_carry: u32,
    pub from_grace: u32,
    /// SRs beyond every layer, e.g. after a plan downgrade
    pub over_limit: u32,
}

pub fn attribute(allowance: &Allowance, used: u32) -> Attribution {
    let mut left = used;
    let mut take = |cap: u32| {
        let n = left.min(cap);
        left -= n;
        n
    };
    let from_base = take(allowance.base);
    let from_manual = take(allowance.manual);
    let from_carry = take(allowance.carry);
    let from_grace = take(allowance.grace());
    Attribution {
        from_base,
        from_manual,
        from_carry,
        from_grace,
        over_limit: left,
    }
}

/// Quota view returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub company: String,
    pub month: Month,
    pub used: u32,
    pub base: u32,
    pub manual: u32,
    pub carry: u32,
    pub grace_used: bool,
    pub total_allowed: u32,
    pub remaining: u32,
    /// Unused bundle tickets (manual plus carried)
    pub remaining_additional: u32,
    pub attribution: Attribution,
}

impl QuotaStatus {
    pub fn new(company: impl Into<String>, month: Month, allowance: &Allowance, used: u32) -> Self {
        let used_against_additional = used
            .saturating_sub(allowance.base)
            .saturating_sub(allowance.grace());
        let total_allowed = allowance.total_allowed();
        Self {
            company: company.into(),
            month,
            used,
            base: allowance.base,
            manual: allowance.manual,
            carry: allowance.carry,
            grace_used: allowance.grace_used,
            total_allowed,
            remaining: total_allowed.saturating_sub(used),
            remaining_additional: allowance
                .manual
                .saturating_add(allowance.carry)
                .saturating_sub(used_against_additional),
            attribution: attribute(allowance, used),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn june() -> Month {
        "2024-06".parse().unwrap()
    }

    #[test]
    fn test_allowance_is_additive() {
        for grace in [false, true] {
            for (base, manual, carry) in [(0, 0, 0), (10, 3, 0), (5, 0, 2), (0, 10, 1)] {
                let a = compute_allowance(base, manual, carry, grace);
                assert_eq!(a.total_allowed(), base + manual + carry + u32::from(grace));
                assert_eq!(a.pre_grace(), base + manual + carry);
            }
        }
    }

    #[test]
    fn test_within_limit_is_allowed_without_grace() {
        // base 10 + manual 3, 8 used
        let a = compute_allowance(10, 3, 0, false);
        assert_eq!(
            decide(&a, 8, false),
            Admission::Allow {
                consumes_grace: false
            }
        );
        let status = QuotaStatus::new("Acme", june(), &a, 8);
        assert_eq!(status.total_allowed, 13);
        assert_eq!(status.remaining, 5);
        assert_eq!(status.remaining_additional, 3);
    }

    #[test]
    fn test_grace_flow() {
        let fresh = compute_allowance(5, 0, 0, false);
        assert_eq!(
            decide(&fresh, 5, false),
            Admission::DenySoft {
                reason: DenyReason::GraceAvailable
            }
        );
        assert_eq!(
            decide(&fresh, 5, true),
            Admission::Allow {
                consumes_grace: true
            }
        );

        let spent = compute_allowance(5, 0, 0, true);
        assert_eq!(spent.total_allowed(), 6);
        for override_requested in [false, true] {
            assert_eq!(
                decide(&spent, 6, override_requested),
                Admission::DenyHard {
                    reason: DenyReason::QuotaExhausted
                }
            );
        }
    }

    #[test]
    fn test_override_below_limit_does_not_consume_grace() {
        let a = compute_allowance(5, 0, 0, false);
        assert_eq!(
            decide(&a, 2, true),
            Admission::Allow {
                consumes_grace: false
            }
        );
    }

    #[test]
    fn test_zero_base_plan() {
        let a = compute_allowance(0, 0, 0, false);
        assert!(!decide(&a, 0, false).is_allowed());
        assert!(decide(&a, 0, true).is_allowed());
    }

    #[test]
    fn test_deny_maps_to_errors() {
        let err = Admission::DenySoft {
            reason: DenyReason::GraceAvailable,
        }
        .into_result()
        .unwrap_err();
        assert!(matches!(err, QuotaError::GraceAvailable));
        assert_eq!(
            Admission::Allow {
                consumes_grace: true
            }
            .into_result()
            .unwrap(),
            true
        );
    }

    #[test]
    fn test_carry_leftover() {
        // Base 5 fully used, 2 of 3 manual used
        let may = PreviousMonth {
            base: 5,
            manual: 3,
            used: 7,
            grace_used: false,
        };
        assert_eq!(carry_leftover(&may), 1);

        // Grace absorbs one SR before manual bundles do
        let with_grace = PreviousMonth {
            grace_used: true,
            used: 8,
            ..may
        };
        assert_eq!(carry_leftover(&with_grace), 1);

        // Nothing purchased, nothing rolls
        let plain = PreviousMonth {
            base: 5,
            manual: 0,
            used: 1,
            grace_used: false,
        };
        assert_eq!(carry_leftover(&plain), 0);

        // Over-consumption clamps at zero
        let heavy = PreviousMonth {
            base: 5,
            manual: 3,
            used: 20,
            grace_used: true,
        };
        assert_eq!(carry_leftover(&heavy), 0);

        // Unused base never rolls
        let idle = PreviousMonth {
            base: 10,
            manual: 2,
            used: 0,
            grace_used: false,
        };
        assert_eq!(carry_leftover(&idle), 2);
    }

    #[test]
    fn test_attribution_order() {
        let a = compute_allowance(5, 3, 2, true);
        let split = attribute(&a, 9);
        assert_eq!(
            split,
            Attribution {
                from_base: 5,
                from_manual: 3,
                from_carry: 1,
                from_grace: 0,
                over_limit: 0,
            }
        );

        let split = attribute(&a, 12);
        assert_eq!(split.from_carry, 2);
        assert_eq!(split.from_grace, 1);
        assert_eq!(split.over_limit, 1);
    }

    #[test]
    fn test_status_after_downgrade_clamps() {
        let a = compute_allowance(2, 0, 0, false);
        let status = QuotaStatus::new("Acme", june(), &a, 4);
        assert_eq!(status.remaining, 0);
        assert_eq!(status.remaining_additional, 0);
        assert_eq!(status.attribution.over_limit, 2);
    }

    #[test]
    fn test_admission_json_shape() {
        let json = serde_json::to_value(Admission::DenyHard {
            reason: DenyReason::QuotaExhausted,
        })
        .unwrap();
        assert_eq!(json["decision"], "deny_hard");
        assert_eq!(json["reason"], "QUOTA_EXHAUSTED");
    }
}
