#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use kubelet_csr_approver_core as core;
pub use kubelet_csr_approver_k8s as k8s;

mod args;
mod controller;
mod metrics;
mod resolver;

pub use self::{args::Args, metrics::Metrics, resolver::SystemResolver};
