use crate::{
    approval::{Decision, State},
    core::{
        validate, ParseError, ParsedRequest, Policy, Resolve, ValidationResult,
        KUBELET_SERVING_SIGNER, NODE_USER_PREFIX,
    },
    ApiError, Backoff, CertificateSigningRequest, CsrApi,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Decides pending kubelet serving CSRs and writes the decision back to the
/// cluster.
pub struct Reconciler<C, R> {
    client: C,
    resolver: R,
    policy: Arc<Policy>,
    signer_name: String,
    ignore_non_node_requestors: bool,
    backoff: Backoff,
    shutdown: CancellationToken,
}

/// The result of one reconciliation of a CSR.
#[derive(Debug)]
pub enum Outcome {
    Approved(ValidationResult),
    Denied(ValidationResult),
    /// The CSR already carried a terminal condition; nothing was written.
    AlreadyDecided(State),
    /// The CSR no longer exists.
    Gone,
    Ignored(IgnoreReason),
    /// The request could not be decoded. It is left pending for an operator.
    ParseError(ParseError),
    /// The API server refused the write for a reason retrying cannot fix.
    Rejected(ApiError),
    /// Shutdown began before a decision was reached.
    Aborted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    Signer,
    NonNodeRequestor,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("giving up on CSR {name} after {attempts} attempts: {source}")]
    Transient {
        name: String,
        attempts: u32,
        #[source]
        source: ApiError,
    },
}

// === impl Reconciler ===

impl<C, R> Reconciler<C, R>
where
    C: CsrApi,
    R: Resolve,
{
    pub fn new(client: C, resolver: R, policy: Arc<Policy>) -> Self {
        Self {
            client,
            resolver,
            policy,
            signer_name: KUBELET_SERVING_SIGNER.to_string(),
            ignore_non_node_requestors: false,
            backoff: Backoff::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_signer_name(self, signer_name: impl Into<String>) -> Self {
        Self {
            signer_name: signer_name.into(),
            ..self
        }
    }

    pub fn with_backoff(self, backoff: Backoff) -> Self {
        Self { backoff, ..self }
    }

    /// Leaves CSRs from requestors other than `system:node:*` untouched.
    pub fn ignore_non_node_requestors(self, ignore: bool) -> Self {
        Self {
            ignore_non_node_requestors: ignore,
            ..self
        }
    }

    /// Evaluation is abandoned once `shutdown` is cancelled.
    pub fn with_shutdown(self, shutdown: CancellationToken) -> Self {
        Self { shutdown, ..self }
    }

    /// Fetches the named CSR and, if it is still pending, decides it.
    ///
    /// Conflicting or transiently failing writes restart the whole
    /// fetch-evaluate-write step against the latest version of the CSR,
    /// until the backoff is exhausted.
    pub async fn reconcile(&self, name: &str) -> Result<Outcome, Error> {
        let mut delays = self.backoff.delays();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match self.attempt(name).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) if !error.is_retryable() => return Ok(Outcome::Rejected(error)),
                Err(error) => error,
            };

            let Some(delay) = delays.next() else {
                return Err(Error::Transient {
                    name: name.to_string(),
                    attempts,
                    source: error,
                });
            };
            debug!(%name, attempts, %error, ?delay, "Retrying CSR decision");
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(Outcome::Aborted),
                _ = time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self, name: &str) -> Result<Outcome, ApiError> {
        let Some(csr) = self.client.get(name).await? else {
            return Ok(Outcome::Gone);
        };

        let state = State::of(&csr);
        if state.is_terminal() {
            return Ok(Outcome::AlreadyDecided(state));
        }

        let req = match self.screen(&csr) {
            Ok(req) => req,
            Err(outcome) => return Ok(outcome),
        };

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(Outcome::Aborted),
            result = validate(&req, &self.policy, &self.resolver) => result,
        };

        let decision = Decision::from(&result);
        self.client.update_approval(&decision.apply_to(&csr)).await?;
        Ok(if decision.is_approve() {
            Outcome::Approved(result)
        } else {
            Outcome::Denied(result)
        })
    }

    /// Filters out CSRs this approver does not govern and decodes the rest.
    fn screen(&self, csr: &CertificateSigningRequest) -> Result<ParsedRequest, Outcome> {
        let spec = &csr.spec;
        if spec.signer_name != self.signer_name {
            return Err(Outcome::Ignored(IgnoreReason::Signer));
        }

        let username = spec.username.as_deref().unwrap_or_default();
        if self.ignore_non_node_requestors && !username.starts_with(NODE_USER_PREFIX) {
            return Err(Outcome::Ignored(IgnoreReason::NonNodeRequestor));
        }

        ParsedRequest::decode(&spec.request.0, username, spec.expiration_seconds)
            .map(|req| req.with_usages(spec.usages.iter().flatten().cloned()))
            .map_err(Outcome::ParseError)
    }
}

// === impl Outcome ===

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved(_) => "approved",
            Self::Denied(_) => "denied",
            Self::AlreadyDecided(_) => "already-decided",
            Self::Gone => "gone",
            Self::Ignored(_) => "ignored",
            Self::ParseError(_) => "parse-error",
            Self::Rejected(_) => "rejected",
            Self::Aborted => "aborted",
        }
    }

    pub fn validation(&self) -> Option<&ValidationResult> {
        match self {
            Self::Approved(result) | Self::Denied(result) => Some(result),
            _ => None,
        }
    }
}

// === impl IgnoreReason ===

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signer => f.write_str("not addressed to the governed signer"),
            Self::NonNodeRequestor => f.write_str("requestor is not a node"),
        }
    }
}
