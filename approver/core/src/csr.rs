use std::{borrow::Cow, collections::BTreeSet, net::IpAddr};
use thiserror::Error;
use x509_parser::{
    certification_request::X509CertificationRequest,
    extensions::{GeneralName, ParsedExtension},
    prelude::FromDer,
};

/// Validity requested when a CSR does not carry `expirationSeconds`. This is
/// the kube-controller-manager's default signing duration.
pub const DEFAULT_EXPIRATION_SECONDS: i64 = 365 * 24 * 60 * 60;

const PEM_TAGS: [&str; 2] = ["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid PEM encoding: {0}")]
    Pem(String),

    #[error("unexpected PEM block {0:?}, expected a CERTIFICATE REQUEST")]
    PemTag(String),

    #[error("malformed PKCS#10 request: {0}")]
    Malformed(String),

    #[error("{0} trailing bytes after the certificate request")]
    TrailingBytes(usize),

    #[error("certificate request subject has no common name")]
    MissingCommonName,

    #[error("certificate request has no public key")]
    MissingPublicKey,

    #[error("certificate request signature is invalid: {0}")]
    Signature(String),

    #[error("certificate request extensions could not be decoded: {0}")]
    Extension(String),

    #[error("SAN IP address has invalid length {0}")]
    IpAddressLength(usize),
}

/// The attributes of a kubelet's certificate request that the policy
/// evaluates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRequest {
    /// The authenticated requestor, e.g. `system:node:worker-1`.
    pub username: String,

    /// The subject common name of the PKCS#10 request.
    pub common_name: String,

    /// SAN DNS names, in the order the request declares them.
    pub dns_names: Vec<String>,

    /// SAN IP addresses.
    pub ip_addresses: BTreeSet<IpAddr>,

    /// Requested certificate lifetime. Falls back to
    /// [`DEFAULT_EXPIRATION_SECONDS`] when the request leaves it unset.
    pub expiration_seconds: i64,

    /// Key usages listed on the CSR resource.
    pub usages: Vec<String>,
}

// === impl ParsedRequest ===

impl ParsedRequest {
    /// Decodes a PEM- or DER-encoded PKCS#10 request.
    pub fn decode(
        raw: &[u8],
        username: impl Into<String>,
        expiration_seconds: Option<i32>,
    ) -> Result<Self, ParseError> {
        let der = to_der(raw)?;
        let (rest, csr) = X509CertificationRequest::from_der(&der)
            .map_err(|e| ParseError::Malformed(e.to_string()))?;
        if !rest.is_empty() {
            return Err(ParseError::TrailingBytes(rest.len()));
        }

        let info = &csr.certification_request_info;
        let common_name = info
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .filter(|cn| !cn.is_empty())
            .ok_or(ParseError::MissingCommonName)?
            .to_string();

        if info.subject_pki.subject_public_key.data.is_empty() {
            return Err(ParseError::MissingPublicKey);
        }

        csr.verify_signature()
            .map_err(|e| ParseError::Signature(e.to_string()))?;

        let mut dns_names = Vec::new();
        let mut ip_addresses = BTreeSet::new();
        for ext in csr.requested_extensions().into_iter().flatten() {
            match ext {
                ParsedExtension::SubjectAlternativeName(san) => {
                    for name in &san.general_names {
                        match name {
                            GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                            GeneralName::IPAddress(bytes) => {
                                ip_addresses.insert(ip_from_bytes(bytes)?);
                            }
                            // Other SAN kinds are not issued by the kubelet
                            // serving signer.
                            _ => {}
                        }
                    }
                }
                ParsedExtension::ParseError { error } => {
                    return Err(ParseError::Extension(error.to_string()));
                }
                _ => {}
            }
        }

        Ok(Self {
            username: username.into(),
            common_name,
            dns_names,
            ip_addresses,
            expiration_seconds: expiration_seconds
                .map(i64::from)
                .unwrap_or(DEFAULT_EXPIRATION_SECONDS),
            usages: Vec::new(),
        })
    }

    pub fn with_usages(mut self, usages: impl IntoIterator<Item = String>) -> Self {
        self.usages = usages.into_iter().collect();
        self
    }

    /// The node name carried by a `system:node:<name>` requestor.
    pub fn node_name(&self) -> Option<&str> {
        self.username
            .strip_prefix(crate::NODE_USER_PREFIX)
            .filter(|name| !name.is_empty())
    }
}

fn to_der(raw: &[u8]) -> Result<Cow<'_, [u8]>, ParseError> {
    if !raw.trim_ascii_start().starts_with(b"-----BEGIN") {
        return Ok(Cow::Borrowed(raw));
    }

    let block = pem::parse(raw).map_err(|e| ParseError::Pem(e.to_string()))?;
    if !PEM_TAGS.contains(&block.tag()) {
        return Err(ParseError::PemTag(block.tag().to_string()));
    }
    Ok(Cow::Owned(block.into_contents()))
}

fn ip_from_bytes(bytes: &[u8]) -> Result<IpAddr, ParseError> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Ok(IpAddr::from(octets));
    }
    if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        return Ok(IpAddr::from(octets));
    }
    Err(ParseError::IpAddressLength(bytes.len()))
}
