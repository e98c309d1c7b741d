use crate::k8s::{Error, Outcome};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct Metrics {
    reconciliations: Family<OutcomeLabels, Counter>,
    check_failures: Family<CheckLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OutcomeLabels {
    outcome: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct CheckLabels {
    check: &'static str,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciliations = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "reconciliations",
            "Total number of CSR reconciliations by outcome",
            reconciliations.clone(),
        );

        let check_failures = Family::<CheckLabels, Counter>::default();
        reg.register(
            "check_failures",
            "Total number of failed validation checks on denied CSRs",
            check_failures.clone(),
        );

        Self {
            reconciliations,
            check_failures,
        }
    }

    pub fn record(&self, result: &Result<Outcome, Error>) {
        let outcome = match result {
            Ok(outcome) => outcome.as_str(),
            Err(Error::Transient { .. }) => "transient-error",
        };
        self.reconciliations
            .get_or_create(&OutcomeLabels { outcome })
            .inc();

        if let Ok(Outcome::Denied(result)) = result {
            for (check, _) in result.failures() {
                self.check_failures
                    .get_or_create(&CheckLabels {
                        check: check.as_str(),
                    })
                    .inc();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{Check, ValidationResult, Verdict},
        k8s::{ApiError, IgnoreReason},
    };

    fn encode(reg: &Registry) -> String {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, reg).expect("metrics must encode");
        buf
    }

    #[test]
    fn counts_outcomes_and_failed_checks() {
        let mut prom = Registry::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("kubelet_csr_approver"));

        let denied = [
            (Check::IdentityScope, Verdict::Pass),
            (Check::IpRange, Verdict::Fail("10.9.0.1 is not allowed".to_string())),
            (Check::Duration, Verdict::Fail("too long".to_string())),
        ]
        .into_iter()
        .collect::<ValidationResult>();
        metrics.record(&Ok(Outcome::Approved(ValidationResult::default())));
        metrics.record(&Ok(Outcome::Approved(ValidationResult::default())));
        metrics.record(&Ok(Outcome::Denied(denied)));
        metrics.record(&Ok(Outcome::Ignored(IgnoreReason::Signer)));
        metrics.record(&Err(Error::Transient {
            name: "csr-1".to_string(),
            attempts: 5,
            source: ApiError::Conflict,
        }));

        let text = encode(&prom);
        for line in [
            r#"kubelet_csr_approver_reconciliations_total{outcome="approved"} 2"#,
            r#"kubelet_csr_approver_reconciliations_total{outcome="denied"} 1"#,
            r#"kubelet_csr_approver_reconciliations_total{outcome="ignored"} 1"#,
            r#"kubelet_csr_approver_reconciliations_total{outcome="transient-error"} 1"#,
            r#"kubelet_csr_approver_check_failures_total{check="ip-range"} 1"#,
            r#"kubelet_csr_approver_check_failures_total{check="duration"} 1"#,
        ] {
            assert!(text.lines().any(|l| l == line), "missing {line:?} in:\n{text}");
        }
        assert!(!text.contains(r#"check="identity-scope""#), "{text}");
    }
}
