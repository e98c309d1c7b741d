#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod approval;
mod backoff;
mod client;
mod reconcile;


pub use self::{
    approval::{Decision, State},
    backoff::Backoff,
    client::{ApiError, CsrApi},
    reconcile::{Error, IgnoreReason, Outcome, Reconciler},
};
pub use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestCondition,
};
pub use kubelet_csr_approver_core as core;
