//! Peer certificate inspection
//!
//! Fingerprint parsing and domain matching used by
//! [`Engine::verify_fingerprint`](super::Engine::verify_fingerprint).

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref};

/// Length of a SHA-256 fingerprint in bytes
pub const FINGERPRINT_LEN: usize = 32;

/// Information extracted from a peer certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    /// Subject Common Name
    pub subject: Option<String>,
    /// Issuer Common Name
    pub issuer: Option<String>,
    /// DNS Subject Alternative Names
    pub dns_names: Vec<String>,
    /// SHA-256 of the DER encoding
    pub fingerprint: [u8; FINGERPRINT_LEN],
}

impl PeerCertificate {
    /// Extract certificate information. `None` if the digest fails.
    pub fn from_x509(cert: &X509Ref) -> Option<Self> {
        let digest = cert.digest(MessageDigest::sha256()).ok()?;
        let fingerprint: [u8; FINGERPRINT_LEN] = digest.as_ref().try_into().ok()?;

        Some(PeerCertificate {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            dns_names: dns_names(cert),
            fingerprint,
        })
    }

    /// Whether the certificate was issued for `domain`
    ///
    /// DNS SANs are checked first; the subject CN is only consulted when
    /// the certificate carries no DNS SAN.
    pub fn matches_domain(&self, domain: &str) -> bool {
        if !self.dns_names.is_empty() {
            return self.dns_names.iter().any(|name| name_matches(name, domain));
        }
        self.subject
            .as_deref()
            .map(|cn| name_matches(cn, domain))
            .unwrap_or(false)
    }

    /// Check the fingerprint and, if given, the domain
    pub fn verify(&self, fingerprint: &str, domain: Option<&str>) -> bool {
        let Some(expected) = parse_fingerprint(fingerprint) else {
            return false;
        };
        if expected != self.fingerprint {
            return false;
        }
        domain.map(|d| self.matches_domain(d)).unwrap_or(true)
    }
}

/// Parse a hex SHA-256 fingerprint
///
/// Accepts `:` and whitespace between digits, any case.
pub fn parse_fingerprint(text: &str) -> Option<[u8; FINGERPRINT_LEN]> {
    let digits: String = text
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect();

    let mut out = [0u8; FINGERPRINT_LEN];
    hex::decode_to_slice(&digits, &mut out).ok()?;
    Some(out)
}

fn common_name(name: &X509NameRef) -> Option<String> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
}

fn dns_names(cert: &X509Ref) -> Vec<String> {
    cert.subject_alt_names()
        .map(|sans| {
            sans.iter()
                .filter_map(|name| name.dnsname().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Case-insensitive host match with a single leftmost `*.` wildcard label
fn name_matches(pattern: &str, domain: &str) -> bool {
    let pattern = pattern.trim_end_matches('.');
    let domain = domain.trim_end_matches('.');

    match pattern.strip_prefix("*.") {
        Some(suffix) => match domain.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
            None => false,
        },
        None => pattern.eq_ignore_ascii_case(domain),
    }
}
