use ipnet::IpNet;
use regex::Regex;
use std::{net::IpAddr, time::Duration};
use thiserror::Error;

/// The longest certificate lifetime an operator may allow.
pub const MAX_EXPIRATION_SECONDS_LIMIT: i64 = 367 * 24 * 60 * 60;

/// The most SAN DNS names an operator may allow per request.
pub const MAX_DNS_NAMES_LIMIT: usize = 1000;

pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the provider regex must be specified")]
    EmptyPattern,

    #[error("invalid provider regex: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("at least one IP prefix must be specified")]
    NoPrefixes,

    #[error("unable to parse IP prefix {prefix:?}: {source}")]
    InvalidPrefix {
        prefix: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error(
        "the maximum expiration seconds must be between 0 and {max} (367 days), got {0}",
        max = MAX_EXPIRATION_SECONDS_LIMIT
    )]
    MaxExpiration(i64),

    #[error(
        "the number of allowed DNS names must be between 1 and {max}, got {0}",
        max = MAX_DNS_NAMES_LIMIT
    )]
    AllowedDnsNames(usize),
}

/// Unvalidated policy inputs, as supplied by the configuration layer.
#[derive(Clone, Debug)]
pub struct PolicyConfig {
    pub name_pattern: String,
    /// Comma-separated list of CIDR prefixes, e.g. `10.0.0.0/8,fd00::/8`.
    pub ip_prefixes: String,
    pub max_expiration_seconds: i64,
    pub allowed_dns_names: usize,
    pub bypass_dns_resolution: bool,
    pub bypass_hostname_check: bool,
    pub bypass_identity_scope: bool,
    pub resolve_timeout: Duration,
}

/// Immutable validation parameters, compiled once at startup.
#[derive(Clone, Debug)]
pub struct Policy {
    name_pattern: Regex,
    allowed_networks: Vec<IpNet>,
    max_expiration_seconds: i64,
    allowed_dns_names: usize,
    bypass_dns_resolution: bool,
    bypass_hostname_check: bool,
    bypass_identity_scope: bool,
    resolve_timeout: Duration,
}

// === impl PolicyConfig ===

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            name_pattern: ".*".to_string(),
            ip_prefixes: "0.0.0.0/0,::/0".to_string(),
            max_expiration_seconds: MAX_EXPIRATION_SECONDS_LIMIT,
            allowed_dns_names: 1,
            bypass_dns_resolution: false,
            bypass_hostname_check: false,
            bypass_identity_scope: false,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }
}

// === impl Policy ===

impl Policy {
    pub fn new(config: PolicyConfig) -> Result<Self, ConfigError> {
        let PolicyConfig {
            name_pattern,
            ip_prefixes,
            max_expiration_seconds,
            allowed_dns_names,
            bypass_dns_resolution,
            bypass_hostname_check,
            bypass_identity_scope,
            resolve_timeout,
        } = config;

        if name_pattern.is_empty() {
            return Err(ConfigError::EmptyPattern);
        }
        // Names must match the pattern in full, regardless of whether the
        // operator anchored it.
        let name_pattern = Regex::new(&format!("^(?:{name_pattern})$"))?;

        let allowed_networks = parse_prefixes(&ip_prefixes)?;

        if !(0..=MAX_EXPIRATION_SECONDS_LIMIT).contains(&max_expiration_seconds) {
            return Err(ConfigError::MaxExpiration(max_expiration_seconds));
        }
        if !(1..=MAX_DNS_NAMES_LIMIT).contains(&allowed_dns_names) {
            return Err(ConfigError::AllowedDnsNames(allowed_dns_names));
        }

        Ok(Self {
            name_pattern,
            allowed_networks,
            max_expiration_seconds,
            allowed_dns_names,
            bypass_dns_resolution,
            bypass_hostname_check,
            bypass_identity_scope,
            resolve_timeout,
        })
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name_pattern.is_match(name)
    }

    pub fn allows_ip(&self, addr: &IpAddr) -> bool {
        self.allowed_networks.iter().any(|net| net.contains(addr))
    }

    pub fn allowed_networks(&self) -> &[IpNet] {
        &self.allowed_networks
    }

    pub fn max_expiration_seconds(&self) -> i64 {
        self.max_expiration_seconds
    }

    pub fn allowed_dns_names(&self) -> usize {
        self.allowed_dns_names
    }

    pub fn bypass_dns_resolution(&self) -> bool {
        self.bypass_dns_resolution
    }

    pub fn bypass_hostname_check(&self) -> bool {
        self.bypass_hostname_check
    }

    pub fn bypass_identity_scope(&self) -> bool {
        self.bypass_identity_scope
    }

    pub fn resolve_timeout(&self) -> Duration {
        self.resolve_timeout
    }
}

fn parse_prefixes(s: &str) -> Result<Vec<IpNet>, ConfigError> {
    let nets = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|prefix| {
            prefix
                .parse::<IpNet>()
                .map_err(|source| ConfigError::InvalidPrefix {
                    prefix: prefix.to_string(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if nets.is_empty() {
        return Err(ConfigError::NoPrefixes);
    }
    Ok(nets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PolicyConfig {
        PolicyConfig {
            name_pattern: r"^.+\.cluster\.local$".to_string(),
            ip_prefixes: "10.0.0.0/16, fd00::/8".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn builds_from_valid_config() {
        let policy = Policy::new(config()).expect("policy must build");
        assert_eq!(policy.allowed_networks().len(), 2);
        assert!(policy.allows_ip(&"10.0.1.5".parse().unwrap()));
        assert!(policy.allows_ip(&"fd00::1".parse().unwrap()));
        assert!(!policy.allows_ip(&"10.1.0.1".parse().unwrap()));
    }

    #[test]
    fn pattern_matches_whole_name() {
        let policy = Policy::new(PolicyConfig {
            name_pattern: r"worker-\d+".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert!(policy.matches_name("worker-1"));
        assert!(!policy.matches_name("worker-1.evil.example"));
        assert!(!policy.matches_name("my-worker-1"));
    }

    #[test]
    fn default_allows_everything() {
        let policy = Policy::new(PolicyConfig::default()).unwrap();
        assert!(policy.matches_name("anything.example.com"));
        assert!(policy.allows_ip(&"203.0.113.9".parse().unwrap()));
        assert!(policy.allows_ip(&"2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn rejects_empty_pattern() {
        let err = Policy::new(PolicyConfig {
            name_pattern: String::new(),
            ..config()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPattern));
    }

    #[test]
    fn rejects_invalid_pattern() {
        let err = Policy::new(PolicyConfig {
            name_pattern: "(unclosed".to_string(),
            ..config()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern(_)));
    }

    #[test]
    fn rejects_invalid_prefix() {
        let err = Policy::new(PolicyConfig {
            ip_prefixes: "10.0.0.0/8,10.0.0.0/33".to_string(),
            ..config()
        })
        .unwrap_err();
        match err {
            ConfigError::InvalidPrefix { prefix, .. } => assert_eq!(prefix, "10.0.0.0/33"),
            err => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn rejects_missing_prefixes() {
        let err = Policy::new(PolicyConfig {
            ip_prefixes: " , ".to_string(),
            ..config()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoPrefixes));
    }

    #[test]
    fn rejects_out_of_range_bounds() {
        for max in [-1, MAX_EXPIRATION_SECONDS_LIMIT + 1] {
            let err = Policy::new(PolicyConfig {
                max_expiration_seconds: max,
                ..config()
            })
            .unwrap_err();
            assert!(matches!(err, ConfigError::MaxExpiration(m) if m == max));
        }

        for count in [0, MAX_DNS_NAMES_LIMIT + 1] {
            let err = Policy::new(PolicyConfig {
                allowed_dns_names: count,
                ..config()
            })
            .unwrap_err();
            assert!(matches!(err, ConfigError::AllowedDnsNames(c) if c == count));
        }
    }
}
