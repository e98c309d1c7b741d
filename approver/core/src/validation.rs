use crate::{ParsedRequest, Policy, Resolve, ResolveError, NODE_USER_PREFIX};
use futures::future;
use std::{collections::BTreeSet, fmt, net::IpAddr};

const USAGE_SERVER_AUTH: &str = "server auth";
const ALLOWED_USAGES: [&str; 3] = ["digital signature", "key encipherment", USAGE_SERVER_AUTH];

/// A single policy check. Variants are declared in evaluation order, which
/// is also the order failure reasons are reported in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Check {
    IdentityScope,
    CommonName,
    DnsNameCount,
    NamePattern,
    Resolution,
    Hostname,
    IpRange,
    Duration,
    Usages,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(String),
}

/// The verdict of every check that was evaluated against a request. Checks
/// disabled by the policy have no entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationResult {
    checks: Vec<(Check, Verdict)>,
}

// === impl Check ===

impl Check {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::IdentityScope => "identity-scope",
            Self::CommonName => "common-name",
            Self::DnsNameCount => "dns-name-count",
            Self::NamePattern => "name-pattern",
            Self::Resolution => "resolution",
            Self::Hostname => "hostname",
            Self::IpRange => "ip-range",
            Self::Duration => "duration",
            Self::Usages => "usages",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Verdict ===

impl Verdict {
    fn check(ok: bool, reason: impl FnOnce() -> String) -> Self {
        if ok {
            Self::Pass
        } else {
            Self::Fail(reason())
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

// === impl ValidationResult ===

impl ValidationResult {
    fn push(&mut self, check: Check, verdict: Verdict) {
        self.checks.push((check, verdict));
    }

    /// True iff every evaluated check passed.
    pub fn approved(&self) -> bool {
        self.checks.iter().all(|(_, v)| v.is_pass())
    }

    pub fn get(&self, check: Check) -> Option<&Verdict> {
        self.checks
            .iter()
            .find(|(c, _)| *c == check)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Check, &Verdict)> + '_ {
        self.checks.iter().map(|(c, v)| (*c, v))
    }

    pub fn failures(&self) -> impl Iterator<Item = (Check, &str)> + '_ {
        self.checks.iter().filter_map(|(c, v)| match v {
            Verdict::Fail(reason) => Some((*c, reason.as_str())),
            Verdict::Pass => None,
        })
    }

    /// Every failure reason, in check order.
    pub fn denial_message(&self) -> String {
        self.failures()
            .map(|(check, reason)| format!("{check}: {reason}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl FromIterator<(Check, Verdict)> for ValidationResult {
    fn from_iter<I: IntoIterator<Item = (Check, Verdict)>>(iter: I) -> Self {
        Self {
            checks: iter.into_iter().collect(),
        }
    }
}

/// Evaluates every applicable check of `policy` against `req`.
///
/// Checks are independent: a failing check never prevents later checks from
/// running. The only I/O is the DNS lookups of the resolution check, each of
/// which is bounded by the policy's resolve timeout.
pub async fn validate<R>(req: &ParsedRequest, policy: &Policy, resolver: &R) -> ValidationResult
where
    R: Resolve + ?Sized,
{
    let mut result = ValidationResult::default();

    if !policy.bypass_identity_scope() {
        result.push(Check::IdentityScope, identity_scope(req));
    }
    result.push(Check::CommonName, common_name(req));
    result.push(Check::DnsNameCount, dns_name_count(req, policy));
    result.push(Check::NamePattern, name_pattern(req, policy));
    if !policy.bypass_dns_resolution() {
        result.push(Check::Resolution, resolution(req, policy, resolver).await);
    }
    if !policy.bypass_hostname_check() && !policy.bypass_identity_scope() {
        result.push(Check::Hostname, hostname(req));
    }
    result.push(Check::IpRange, ip_range(req, policy));
    result.push(Check::Duration, duration(req, policy));
    if !req.usages.is_empty() {
        result.push(Check::Usages, usages(req));
    }

    result
}

fn identity_scope(req: &ParsedRequest) -> Verdict {
    Verdict::check(req.node_name().is_some(), || {
        format!(
            "requestor {:?} is not a node identity ({NODE_USER_PREFIX}<name>)",
            req.username
        )
    })
}

fn common_name(req: &ParsedRequest) -> Verdict {
    Verdict::check(req.common_name == req.username, || {
        format!(
            "subject common name {:?} does not match requestor {:?}",
            req.common_name, req.username
        )
    })
}

fn dns_name_count(req: &ParsedRequest, policy: &Policy) -> Verdict {
    let count = req.dns_names.len();
    if count == 0 {
        return Verdict::Fail("request carries no SAN DNS names".to_string());
    }
    Verdict::check(count <= policy.allowed_dns_names(), || {
        format!(
            "request carries {count} SAN DNS names, at most {} allowed",
            policy.allowed_dns_names()
        )
    })
}

fn name_pattern(req: &ParsedRequest, policy: &Policy) -> Verdict {
    let mismatched = req
        .dns_names
        .iter()
        .filter(|name| !policy.matches_name(name))
        .map(String::as_str)
        .collect::<Vec<_>>();
    Verdict::check(mismatched.is_empty(), || {
        format!(
            "SAN DNS names do not match the provider regex: {}",
            mismatched.join(", ")
        )
    })
}

async fn resolution<R>(req: &ParsedRequest, policy: &Policy, resolver: &R) -> Verdict
where
    R: Resolve + ?Sized,
{
    // Lookups are only issued for requests within the DNS-name limit.
    if req.dns_names.len() > policy.allowed_dns_names() {
        return Verdict::Fail(format!(
            "not resolved: {} SAN DNS names exceed the limit of {}",
            req.dns_names.len(),
            policy.allowed_dns_names()
        ));
    }

    let timeout = policy.resolve_timeout();
    let lookups = req.dns_names.iter().map(|name| async move {
        let res = match tokio::time::timeout(timeout, resolver.lookup_ip(name)).await {
            Ok(res) => res,
            Err(_) => Err(ResolveError::Timeout),
        };
        (name.as_str(), res)
    });

    let mut resolved = BTreeSet::new();
    let mut errors = Vec::new();
    for (name, res) in future::join_all(lookups).await {
        match res {
            Ok(addrs) => resolved.extend(addrs),
            Err(error) => errors.push(format!("{name}: {error}")),
        }
    }

    if !errors.is_empty() {
        return Verdict::Fail(format!(
            "unable to resolve SAN DNS names: {}",
            errors.join(", ")
        ));
    }
    Verdict::check(!resolved.is_disjoint(&req.ip_addresses), || {
        format!(
            "SAN DNS names resolve to [{}], none of which is a SAN IP address [{}]",
            join_addrs(&resolved),
            join_addrs(&req.ip_addresses)
        )
    })
}

fn hostname(req: &ParsedRequest) -> Verdict {
    let Some(node) = req.node_name() else {
        return Verdict::Fail("no node name could be extracted from the requestor".to_string());
    };
    let matched = req.dns_names.iter().any(|name| {
        let short = name.split('.').next().unwrap_or(name);
        name.eq_ignore_ascii_case(node) || short.eq_ignore_ascii_case(node)
    });
    Verdict::check(matched, || {
        format!("node name {node:?} matches none of the SAN DNS names")
    })
}

fn ip_range(req: &ParsedRequest, policy: &Policy) -> Verdict {
    let outside = req
        .ip_addresses
        .iter()
        .filter(|addr| !policy.allows_ip(addr))
        .copied()
        .collect::<BTreeSet<_>>();
    Verdict::check(outside.is_empty(), || {
        format!(
            "SAN IP addresses outside the allowed prefixes: {}",
            join_addrs(&outside)
        )
    })
}

fn duration(req: &ParsedRequest, policy: &Policy) -> Verdict {
    let secs = req.expiration_seconds;
    let max = policy.max_expiration_seconds();
    Verdict::check(secs > 0 && secs <= max, || {
        format!("requested duration {secs}s is not within (0, {max}]")
    })
}

fn usages(req: &ParsedRequest) -> Verdict {
    let mut problems = Vec::new();
    if !req.usages.iter().any(|u| u == USAGE_SERVER_AUTH) {
        problems.push(format!("missing usage {USAGE_SERVER_AUTH:?}"));
    }
    for usage in &req.usages {
        if !ALLOWED_USAGES.contains(&usage.as_str()) {
            problems.push(format!("usage {usage:?} is not allowed"));
        }
    }
    Verdict::check(problems.is_empty(), || problems.join(", "))
}

fn join_addrs(addrs: &BTreeSet<IpAddr>) -> String {
    addrs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
