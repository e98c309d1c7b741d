use crate::{
    k8s::{CertificateSigningRequest, Error, Outcome, Reconciler},
    metrics::Metrics,
    resolver::SystemResolver,
};
use futures::prelude::*;
use kube::{
    runtime::{
        controller::{self, Action, Controller},
        watcher,
    },
    Api, ResourceExt,
};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Delay before a CSR whose decision could not be written is reconsidered.
const REQUEUE_DELAY: Duration = Duration::from_secs(30);

pub(crate) struct Context {
    pub(crate) reconciler: Reconciler<Api<CertificateSigningRequest>, SystemResolver>,
    pub(crate) metrics: Metrics,
}

/// Drives reconciliation of CSRs addressed to `signer_name`.
///
/// Once `shutdown` is cancelled the controller stops admitting new work and
/// any evaluation still waiting on DNS is abandoned. The returned future
/// completes when in-flight decisions have been written.
pub(crate) async fn run(
    api: Api<CertificateSigningRequest>,
    signer_name: String,
    workers: u16,
    ctx: Arc<Context>,
    shutdown: CancellationToken,
) {
    let watch = watcher::Config::default().fields(&format!("spec.signerName={signer_name}"));
    info!(signer = %signer_name, workers, "Watching certificate signing requests");
    Controller::new(api, watch)
        .with_config(controller::Config::default().concurrency(workers))
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(error) = res {
                debug!(%error, "Controller error");
            }
        })
        .await;
}

async fn reconcile(
    csr: Arc<CertificateSigningRequest>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let name = csr.name_any();
    let span = info_span!("csr", %name);
    let result = ctx.reconciler.reconcile(&name).instrument(span.clone()).await;
    ctx.metrics.record(&result);
    let outcome = result?;
    span.in_scope(|| log_outcome(&outcome));
    Ok(Action::await_change())
}

fn error_policy(_: Arc<CertificateSigningRequest>, error: &Error, _: Arc<Context>) -> Action {
    error!(%error, "Failed to decide CSR");
    Action::requeue(REQUEUE_DELAY)
}

fn log_outcome(outcome: &Outcome) {
    for (check, verdict) in outcome.validation().into_iter().flat_map(|r| r.iter()) {
        debug!(%check, ?verdict, "Evaluated check");
    }
    match outcome {
        Outcome::Approved(_) => info!("Approved CSR"),
        Outcome::Denied(result) => info!(reason = %result.denial_message(), "Denied CSR"),
        Outcome::ParseError(error) => warn!(%error, "Unable to decode CSR; leaving it pending"),
        Outcome::Rejected(error) => warn!(%error, "Decision was rejected by the API server"),
        Outcome::Ignored(reason) => debug!(%reason, "Ignoring CSR"),
        Outcome::AlreadyDecided(state) => debug!(?state, "CSR is already decided"),
        Outcome::Gone => debug!("CSR no longer exists"),
        Outcome::Aborted => debug!("Shutdown interrupted CSR evaluation"),
    }
}
