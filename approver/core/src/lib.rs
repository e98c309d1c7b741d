#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod csr;
pub mod policy;
pub mod resolve;
pub mod validation;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;


pub use self::{
    csr::{ParseError, ParsedRequest, DEFAULT_EXPIRATION_SECONDS},
    policy::{ConfigError, Policy, PolicyConfig},
    resolve::{Resolve, ResolveError, StaticResolver},
    validation::{validate, Check, ValidationResult, Verdict},
};

/// The signer whose requests are governed by the approver.
pub const KUBELET_SERVING_SIGNER: &str = "kubernetes.io/kubelet-serving";

/// Prefix of the username every kubelet authenticates with.
pub const NODE_USER_PREFIX: &str = "system:node:";
