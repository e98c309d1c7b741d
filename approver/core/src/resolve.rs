use std::{collections::HashMap, net::IpAddr};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no addresses found")]
    NotFound,

    #[error("lookup timed out")]
    Timeout,

    #[error("lookup failed: {0}")]
    Failed(String),
}

/// Forward DNS lookups used to check that a requested name actually refers
/// to the requesting node.
#[async_trait::async_trait]
pub trait Resolve: Send + Sync {
    async fn lookup_ip(&self, name: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// A resolver backed by a fixed table. Names missing from the table are
/// reported as not found.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Result<Vec<IpAddr>, ResolveError>>,
}

// === impl StaticResolver ===

impl StaticResolver {
    pub fn with_addrs(mut self, name: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        self.entries
            .insert(name.into().to_ascii_lowercase(), Ok(addrs));
        self
    }

    pub fn with_error(mut self, name: impl Into<String>, error: ResolveError) -> Self {
        self.entries
            .insert(name.into().to_ascii_lowercase(), Err(error));
        self
    }
}

#[async_trait::async_trait]
impl Resolve for StaticResolver {
    async fn lookup_ip(&self, name: &str) -> Result<Vec<IpAddr>, ResolveError> {
        match self.entries.get(&name.to_ascii_lowercase()) {
            Some(Ok(addrs)) if addrs.is_empty() => Err(ResolveError::NotFound),
            Some(res) => res.clone(),
            None => Err(ResolveError::NotFound),
        }
    }
}
