use crate::{
    controller::{self, Context},
    core::{Policy, PolicyConfig, KUBELET_SERVING_SIGNER},
    k8s::{Backoff, Reconciler},
    metrics::Metrics,
    resolver::SystemResolver,
};
use anyhow::{bail, Context as _, Result};
use clap::Parser;
use kube::Api;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "kubelet-csr-approver",
    about = "Approves kubelet serving certificate requests"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "kubelet_csr_approver=info,warn",
        env = "KUBELET_CSR_APPROVER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(
        long,
        default_value = "plain",
        env = "KUBELET_CSR_APPROVER_LOG_FORMAT"
    )]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Pattern every SAN DNS name must fully match.
    #[clap(long, default_value = ".*", env = "PROVIDER_REGEX")]
    provider_regex: String,

    /// Comma-separated CIDRs that every SAN IP address must fall within.
    #[clap(long, default_value = "0.0.0.0/0,::/0", env = "PROVIDER_IP_PREFIXES")]
    provider_ip_prefixes: String,

    /// Longest certificate lifetime that may be requested, in seconds.
    #[clap(long, default_value = "31708800", env = "MAX_EXPIRATION_SEC")]
    max_expiration_sec: i64,

    /// Most SAN DNS names a request may carry.
    #[clap(long, default_value = "1", env = "ALLOWED_DNS_NAMES")]
    allowed_dns_names: usize,

    /// Skips checking that SAN DNS names resolve to a SAN IP address.
    #[clap(long, env = "BYPASS_DNS_RESOLUTION")]
    bypass_dns_resolution: bool,

    /// Skips checking that SAN DNS names start with the node name.
    #[clap(long, env = "BYPASS_HOSTNAME_CHECK")]
    bypass_hostname_check: bool,

    /// Skips checking that requests come from a `system:node:` identity.
    #[clap(long, env = "BYPASS_IDENTITY_SCOPE")]
    bypass_identity_scope: bool,

    /// Leaves requests from non-node identities for another approver.
    #[clap(long, env = "IGNORE_NON_SYSTEM_NODE")]
    ignore_non_system_node: bool,

    #[clap(long, default_value = "1000", env = "DNS_TIMEOUT_MS")]
    dns_timeout_ms: u64,

    #[clap(long, default_value = KUBELET_SERVING_SIGNER, env = "SIGNER_NAME")]
    signer_name: String,

    /// Maximum number of CSRs reconciled concurrently.
    #[clap(long, default_value = "16", env = "WORKERS")]
    workers: u16,

    #[clap(long, default_value = "5", env = "MAX_WRITE_ATTEMPTS")]
    max_write_attempts: u32,

    #[clap(long, default_value = "10", env = "SHUTDOWN_GRACE_PERIOD_SECS")]
    shutdown_grace_period_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let policy = Arc::new(Policy::new(self.policy_config()).context("invalid policy")?);

        let Self {
            admin,
            client,
            log_level,
            log_format,
            ignore_non_system_node,
            signer_name,
            workers,
            max_write_attempts,
            shutdown_grace_period_secs,
            ..
        } = self;

        let mut prom = <Registry>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("kubelet_csr_approver"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let api = Api::all(runtime.client());
        let shutdown = CancellationToken::new();
        let resolver = SystemResolver::from_system_conf()
            .context("failed to load the system DNS resolver configuration")?;
        let reconciler = Reconciler::new(api.clone(), resolver, policy)
            .with_signer_name(signer_name.clone())
            .with_backoff(Backoff::with_max_attempts(max_write_attempts))
            .ignore_non_node_requestors(ignore_non_system_node)
            .with_shutdown(shutdown.clone());
        let ctx = Arc::new(Context {
            reconciler,
            metrics,
        });

        let grace_period = Duration::from_secs(shutdown_grace_period_secs);
        let drain = runtime.shutdown_handle();
        tokio::spawn(
            async move {
                let controller = controller::run(api, signer_name, workers, ctx, shutdown.clone());
                tokio::pin!(controller);
                tokio::select! {
                    _ = (&mut controller) => {}
                    handle = drain.signaled() => {
                        shutdown.cancel();
                        // In-flight decisions get a bounded window to be written.
                        let drained = handle.release_after(time::timeout(grace_period, controller));
                        if drained.await.is_err() {
                            warn!(?grace_period, "In-flight decisions were abandoned at shutdown");
                        }
                    }
                }
            }
            .instrument(info_span!("controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }

    fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            name_pattern: self.provider_regex.clone(),
            ip_prefixes: self.provider_ip_prefixes.clone(),
            max_expiration_seconds: self.max_expiration_sec,
            allowed_dns_names: self.allowed_dns_names,
            bypass_dns_resolution: self.bypass_dns_resolution,
            bypass_hostname_check: self.bypass_hostname_check,
            bypass_identity_scope: self.bypass_identity_scope,
            resolve_timeout: Duration::from_millis(self.dns_timeout_ms),
        }
    }
}
