use crate::core::{Resolve, ResolveError};
use hickory_resolver::{
    name_server::TokioConnectionProvider, proto::ProtoErrorKind, ResolveError as LookupError,
    Resolver,
};
use std::net::IpAddr;

/// Resolves names with the nameservers and search domains of the host's
/// resolver configuration.
#[derive(Clone)]
pub struct SystemResolver(Resolver<TokioConnectionProvider>);

// === impl SystemResolver ===

impl SystemResolver {
    pub fn from_system_conf() -> Result<Self, LookupError> {
        Ok(Self(Resolver::builder_tokio()?.build()))
    }
}

#[async_trait::async_trait]
impl Resolve for SystemResolver {
    async fn lookup_ip(&self, name: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let lookup = self.0.lookup_ip(name).await.map_err(lookup_error)?;

        let mut ips = lookup.iter().collect::<Vec<_>>();
        ips.sort_unstable();
        ips.dedup();
        if ips.is_empty() {
            return Err(ResolveError::NotFound);
        }
        Ok(ips)
    }
}

fn lookup_error(error: LookupError) -> ResolveError {
    if error.is_no_records_found() {
        return ResolveError::NotFound;
    }
    match error.proto().map(|e| e.kind()) {
        Some(ProtoErrorKind::Timeout) => ResolveError::Timeout,
        _ => ResolveError::Failed(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_resolver::{config::ResolverConfig, proto::ProtoError};

    fn resolver() -> SystemResolver {
        SystemResolver(
            Resolver::builder_with_config(
                ResolverConfig::default(),
                TokioConnectionProvider::default(),
            )
            .build(),
        )
    }

    #[tokio::test]
    async fn resolves_literal_addresses() {
        let ips = resolver()
            .lookup_ip("10.0.1.5")
            .await
            .expect("literal addresses resolve without a query");
        assert_eq!(ips, vec![IpAddr::from([10, 0, 1, 5])]);
    }

    #[test]
    fn classifies_lookup_errors() {
        let timeout = LookupError::from(ProtoError::from(ProtoErrorKind::Timeout));
        assert_eq!(lookup_error(timeout), ResolveError::Timeout);

        let failed = LookupError::from("no connections available");
        assert!(matches!(lookup_error(failed), ResolveError::Failed(_)));
    }
}
