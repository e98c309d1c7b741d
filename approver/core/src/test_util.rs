//! Builders for real PKCS#10 requests.

/// Mints a PEM-encoded request. An empty `cn` leaves the subject without a
/// common name.
pub fn make_csr(cn: &str, dns_names: &[&str], ips: &[&str]) -> String {
    make_csr_with(cn, dns_names, ips, Vec::new())
}

/// Like [`make_csr`], with additional raw extensions in the extension request.
pub fn make_csr_with(
    cn: &str,
    dns_names: &[&str],
    ips: &[&str],
    extensions: Vec<rcgen::CustomExtension>,
) -> String {
    let key = rcgen::KeyPair::generate().expect("key generation must succeed");
    let mut params = rcgen::CertificateParams::default();
    params.distinguished_name = rcgen::DistinguishedName::new();
    if !cn.is_empty() {
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, cn);
    }
    params.subject_alt_names = dns_names
        .iter()
        .map(|name| {
            rcgen::SanType::DnsName(
                rcgen::Ia5String::try_from(name.to_string()).expect("valid DNS name"),
            )
        })
        .chain(
            ips.iter()
                .map(|ip| rcgen::SanType::IpAddress(ip.parse().expect("valid IP"))),
        )
        .collect();
    params.custom_extensions = extensions;
    params
        .serialize_request(&key)
        .expect("request must serialize")
        .pem()
        .expect("request must encode")
}
