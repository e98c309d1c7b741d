use crate::{core::ValidationResult, CertificateSigningRequest, CertificateSigningRequestCondition};

pub const CONDITION_APPROVED: &str = "Approved";
pub const CONDITION_DENIED: &str = "Denied";

pub const REASON_APPROVED: &str = "AutoApproved";
pub const REASON_DENIED: &str = "CSRValidationFailed";

const APPROVED_MESSAGE: &str =
    "Auto-approving kubelet serving certificate after SAN and identity validation";

/// The approval state of a CSR as observed on the cluster.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Pending,
    Approved,
    Denied,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    /// Carries every failure reason.
    Deny(String),
}

// === impl State ===

impl State {
    pub fn of(csr: &CertificateSigningRequest) -> Self {
        let status = csr.status.as_ref();
        let conditions = status
            .and_then(|s| s.conditions.as_deref())
            .unwrap_or_default();
        for cond in conditions {
            match cond.type_.as_str() {
                CONDITION_APPROVED => return Self::Approved,
                CONDITION_DENIED => return Self::Denied,
                _ => {}
            }
        }

        // A certificate is only ever issued for an approved request.
        if status.and_then(|s| s.certificate.as_ref()).is_some() {
            return Self::Approved;
        }

        Self::Pending
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

// === impl Decision ===

impl From<&ValidationResult> for Decision {
    fn from(result: &ValidationResult) -> Self {
        if result.approved() {
            Self::Approve
        } else {
            Self::Deny(result.denial_message())
        }
    }
}

impl Decision {
    pub fn is_approve(&self) -> bool {
        matches!(self, Self::Approve)
    }

    pub fn condition(&self) -> CertificateSigningRequestCondition {
        let (type_, reason, message) = match self {
            Self::Approve => (CONDITION_APPROVED, REASON_APPROVED, APPROVED_MESSAGE.to_string()),
            Self::Deny(message) => (CONDITION_DENIED, REASON_DENIED, message.clone()),
        };
        // The API server fills in the condition timestamps.
        CertificateSigningRequestCondition {
            type_: type_.to_string(),
            status: "True".to_string(),
            reason: Some(reason.to_string()),
            message: Some(message),
            last_transition_time: None,
            last_update_time: None,
        }
    }

    /// Returns a copy of `csr` with this decision's condition appended. The
    /// copy keeps the original resource version so that the write fails if
    /// the CSR changed since it was read.
    pub fn apply_to(&self, csr: &CertificateSigningRequest) -> CertificateSigningRequest {
        let mut csr = csr.clone();
        csr.status
            .get_or_insert_with(Default::default)
            .conditions
            .get_or_insert_with(Vec::new)
            .push(self.condition());
        csr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::{
        api::certificates::v1::CertificateSigningRequestStatus, ByteString,
    };

    fn with_conditions(types: &[&str]) -> CertificateSigningRequest {
        CertificateSigningRequest {
            status: Some(CertificateSigningRequestStatus {
                conditions: Some(
                    types
                        .iter()
                        .map(|t| CertificateSigningRequestCondition {
                            type_: t.to_string(),
                            status: "True".to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn observes_state() {
        assert_eq!(State::of(&Default::default()), State::Pending);
        assert_eq!(State::of(&with_conditions(&[])), State::Pending);
        assert_eq!(State::of(&with_conditions(&["Failed"])), State::Pending);
        assert_eq!(State::of(&with_conditions(&["Approved"])), State::Approved);
        assert_eq!(State::of(&with_conditions(&["Denied"])), State::Denied);

        let issued = CertificateSigningRequest {
            status: Some(CertificateSigningRequestStatus {
                certificate: Some(ByteString(b"cert".to_vec())),
                conditions: None,
            }),
            ..Default::default()
        };
        assert_eq!(State::of(&issued), State::Approved);
    }

    #[test]
    fn appends_single_condition() {
        let csr = with_conditions(&[]);
        let denied = Decision::Deny("duration: too long".to_string()).apply_to(&csr);

        let conditions = denied.status.unwrap().conditions.unwrap();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, CONDITION_DENIED);
        assert_eq!(conditions[0].status, "True");
        assert_eq!(conditions[0].reason.as_deref(), Some(REASON_DENIED));
        assert_eq!(conditions[0].message.as_deref(), Some("duration: too long"));

        let approved = Decision::Approve.apply_to(&Default::default());
        assert_eq!(State::of(&approved), State::Approved);
    }
}
