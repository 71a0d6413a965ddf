//! Certificate authority for TLS interception.
//!
//! The root certificate and key are embedded in the binary and parsed once.
//! Leaf certificates are issued lazily, one per intercepted hostname, and
//! cached for the lifetime of the [`CertificateAuthority`].
//!
//! All leaves of one authority share a single key pair and a validity window
//! fixed at construction: `now - 30 days` to `now + 365 days`. An authority
//! that lives longer than 30 days therefore issues certificates whose
//! `notBefore` lags further behind the issuance time.
//!
//! Serial numbers come from a process-wide counter seeded with a random value
//! below 2^40, so they never repeat within a process and rarely across runs.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use rand::Rng;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Issuer, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::{CertifiedKey, SigningKey};
use time::{Duration, OffsetDateTime};

pub use crate::error::CaError;

const ROOT_CERT_PEM: &str = include_str!("../certs/root-ca.crt");
const ROOT_KEY_PEM: &str = include_str!("../certs/root-ca.key");

const LEAF_ORGANIZATION: &str = "cloudmock";
const LEAF_UNIT: &str = "cloudmock fake leaf";

static EMBEDDED_ROOT: Lazy<Arc<RootAuthority>> = Lazy::new(|| {
    Arc::new(
        RootAuthority::from_pem(ROOT_CERT_PEM, ROOT_KEY_PEM)
            .expect("embedded root CA certificate and key must parse"),
    )
});

static NEXT_SERIAL: Lazy<AtomicU64> =
    Lazy::new(|| AtomicU64::new(rand::thread_rng().gen_range(0..1u64 << 40)));

fn next_serial() -> u64 {
    NEXT_SERIAL.fetch_add(1, Ordering::SeqCst) + 1
}

/// Long-lived root certificate and key. Only ever signs leaves.
pub struct RootAuthority {
    cert_pem: String,
    cert_der: CertificateDer<'static>,
    subject: String,
    serial: String,
    not_after: OffsetDateTime,
    issuer: Issuer<'static, KeyPair>,
}

impl RootAuthority {
    /// The root compiled into this crate.
    ///
    /// # Panics
    ///
    /// Panics on first use if the embedded material is malformed; nothing
    /// can be intercepted without it.
    pub fn embedded() -> Arc<RootAuthority> {
        Arc::clone(&EMBEDDED_ROOT)
    }

    /// Parses a PEM certificate and PKCS#8 PEM private key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CaError> {
        let parsed = pem::parse(cert_pem).map_err(|e| CaError::Parse(e.to_string()))?;
        if parsed.tag() != "CERTIFICATE" {
            return Err(CaError::Parse(format!(
                "expected a CERTIFICATE block, found {}",
                parsed.tag()
            )));
        }
        let cert_der = CertificateDer::from(parsed.contents().to_vec());

        let (_, cert) = x509_parser::parse_x509_certificate(&cert_der)
            .map_err(|e| CaError::Parse(e.to_string()))?;
        if !cert.is_ca() {
            return Err(CaError::Parse("root certificate is not a CA".to_string()));
        }
        let subject = cert.subject().to_string();
        let serial = cert.raw_serial_as_string();
        let not_after = cert.validity().not_after.to_datetime();

        let key = KeyPair::from_pem(key_pem).map_err(|e| CaError::Parse(e.to_string()))?;
        let issuer =
            Issuer::from_ca_cert_pem(cert_pem, key).map_err(|e| CaError::Parse(e.to_string()))?;

        Ok(Self {
            cert_pem: cert_pem.to_string(),
            cert_der,
            subject,
            serial,
            not_after,
            issuer,
        })
    }

    /// Root certificate, PEM encoded.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Root certificate, DER encoded. This is what trust stores take.
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    /// Subject distinguished name, e.g. `C=US, O=cloudmock, CN=...`.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Serial number as colon-separated hex.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// End of the root's validity.
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }
}

impl fmt::Debug for RootAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootAuthority")
            .field("subject", &self.subject)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

/// Issues and caches leaf certificates.
pub struct CertificateAuthority {
    root: Arc<RootAuthority>,
    leaf_key: KeyPair,
    signing_key: Arc<dyn SigningKey>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    cache: DashMap<String, Arc<CertifiedKey>>,
}

impl CertificateAuthority {
    /// Creates an authority backed by the embedded root.
    pub fn new() -> Result<Self, CaError> {
        Self::with_root(RootAuthority::embedded())
    }

    /// Creates an authority backed by the given root.
    pub fn with_root(root: Arc<RootAuthority>) -> Result<Self, CaError> {
        let leaf_key = KeyPair::generate()?;
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
        let signing_key =
            rustls::crypto::ring::sign::any_supported_type(&key_der).map_err(CaError::SigningKey)?;

        let now = OffsetDateTime::now_utc();

        Ok(Self {
            root,
            leaf_key,
            signing_key,
            not_before: now - Duration::days(30),
            not_after: now + Duration::days(365),
            cache: DashMap::new(),
        })
    }

    /// The signing root.
    pub fn root(&self) -> &Arc<RootAuthority> {
        &self.root
    }

    /// Number of cached leaves.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Returns the certificate for `hostname`, issuing it on first use.
    ///
    /// Concurrent first calls for the same hostname may each sign a
    /// certificate; only the first stored one is kept and returned to all.
    pub fn fetch(&self, hostname: &str) -> Result<Arc<CertifiedKey>, CaError> {
        if let Some(existing) = self.cache.get(hostname) {
            return Ok(Arc::clone(existing.value()));
        }

        let issued = Arc::new(self.issue(hostname)?);
        let stored = self.cache.entry(hostname.to_string()).or_insert(issued);
        Ok(Arc::clone(stored.value()))
    }

    fn issue(&self, hostname: &str) -> Result<CertifiedKey, CaError> {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CountryName, "US");
        dn.push(DnType::OrganizationName, LEAF_ORGANIZATION);
        dn.push(DnType::OrganizationalUnitName, LEAF_UNIT);

        let mut params = CertificateParams::default();

        if let Ok(ip) = hostname.parse::<IpAddr>() {
            params.subject_alt_names = vec![SanType::IpAddress(ip)];
        } else {
            let dns_name = hostname
                .try_into()
                .map_err(|_| CaError::InvalidHostname(hostname.to_string()))?;
            params.subject_alt_names = vec![SanType::DnsName(dns_name)];
            dn.push(DnType::CommonName, hostname);
        }

        let serial = next_serial();
        params.distinguished_name = dn;
        params.serial_number = Some(SerialNumber::from(serial));
        params.not_before = self.not_before;
        params.not_after = self.not_after;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let cert = params.signed_by(&self.leaf_key, &self.root.issuer)?;

        tracing::debug!(hostname, serial, "issued leaf certificate");

        Ok(CertifiedKey::new(
            vec![cert.der().clone(), self.root.cert_der.clone()],
            Arc::clone(&self.signing_key),
        ))
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    use x509_parser::extensions::GeneralName;
    use x509_parser::prelude::{parse_x509_certificate, X509Certificate};

    fn parse(der: &[u8]) -> X509Certificate<'_> {
        parse_x509_certificate(der).unwrap().1
    }

    fn leaf_der(key: &CertifiedKey) -> Vec<u8> {
        key.cert[0].to_vec()
    }

    #[test]
    fn embedded_root_parses() {
        let root = RootAuthority::embedded();
        assert!(root.cert_pem().contains("BEGIN CERTIFICATE"));
        let cert = parse(root.cert_der());
        assert!(cert.is_ca());
    }

    #[test]
    fn embedded_root_exposes_parsed_fields() {
        let root = RootAuthority::embedded();
        assert_eq!(
            root.subject(),
            "C=US, O=cloudmock, OU=cloudmock root, CN=cloudmock Root CA"
        );
        assert_eq!(root.serial(), "10:00");
        assert!(root.not_after() > OffsetDateTime::now_utc());

        let cert = parse(root.cert_der());
        assert_eq!(root.subject(), cert.subject().to_string());
        assert!(format!("{:?}", root).contains("cloudmock Root CA"));
    }

    #[test]
    fn rejects_malformed_root() {
        assert!(matches!(
            RootAuthority::from_pem("not pem", ROOT_KEY_PEM),
            Err(CaError::Parse(_))
        ));
        assert!(matches!(
            RootAuthority::from_pem(ROOT_KEY_PEM, ROOT_KEY_PEM),
            Err(CaError::Parse(_))
        ));
    }

    #[test]
    fn distinct_hosts_get_distinct_certs_signed_by_root() {
        let ca = CertificateAuthority::new().unwrap();
        let a = leaf_der(&ca.fetch("sts.amazonaws.com").unwrap());
        let b = leaf_der(&ca.fetch("ecs.us-east-1.amazonaws.com").unwrap());
        assert_ne!(a, b);

        let root_der = ca.root().cert_der().to_vec();
        let root = parse(&root_der);
        for der in [&a, &b] {
            let leaf = parse(der);
            leaf.verify_signature(Some(root.public_key())).unwrap();
            assert_eq!(leaf.issuer().to_string(), root.subject().to_string());
        }
    }

    #[test]
    fn fetch_is_idempotent() {
        let ca = CertificateAuthority::new().unwrap();
        let first = leaf_der(&ca.fetch("example.com").unwrap());
        let second = leaf_der(&ca.fetch("example.com").unwrap());
        assert_eq!(parse(&first).raw_serial(), parse(&second).raw_serial());
        assert_eq!(ca.cached_count(), 1);
    }

    #[test]
    fn chain_carries_root() {
        let ca = CertificateAuthority::new().unwrap();
        let key = ca.fetch("example.com").unwrap();
        assert_eq!(key.cert.len(), 2);
        assert_eq!(&key.cert[1], ca.root().cert_der());
    }

    #[test]
    fn dns_leaf_fields() {
        let ca = CertificateAuthority::new().unwrap();
        let der = leaf_der(&ca.fetch("sqs.us-west-2.amazonaws.com").unwrap());
        let cert = parse(&der);

        let san = cert.subject_alternative_name().unwrap().unwrap();
        assert_eq!(
            san.value.general_names,
            vec![GeneralName::DNSName("sqs.us-west-2.amazonaws.com")]
        );
        let cn = cert.subject().iter_common_name().next().unwrap();
        assert_eq!(cn.as_str().unwrap(), "sqs.us-west-2.amazonaws.com");
        let org = cert.subject().iter_organizational_unit().next().unwrap();
        assert_eq!(org.as_str().unwrap(), LEAF_UNIT);
    }

    #[test]
    fn ip_leaf_uses_ip_san() {
        let ca = CertificateAuthority::new().unwrap();
        let der = leaf_der(&ca.fetch("169.254.169.254").unwrap());
        let cert = parse(&der);

        let san = cert.subject_alternative_name().unwrap().unwrap();
        assert_eq!(
            san.value.general_names,
            vec![GeneralName::IPAddress(&[169, 254, 169, 254][..])]
        );
        assert!(cert.subject().iter_common_name().next().is_none());
    }

    #[test]
    fn validity_window_is_shared() {
        let ca = CertificateAuthority::new().unwrap();
        let a = leaf_der(&ca.fetch("a.example.com").unwrap());
        let b = leaf_der(&ca.fetch("b.example.com").unwrap());
        let (a, b) = (parse(&a), parse(&b));
        assert_eq!(a.validity().not_before, b.validity().not_before);
        assert_eq!(a.validity().not_after, b.validity().not_after);

        let span = a.validity().not_after.timestamp() - a.validity().not_before.timestamp();
        assert_eq!(span, 395 * 24 * 60 * 60);
    }

    #[test]
    fn serials_unique_under_concurrency() {
        let ca = Arc::new(CertificateAuthority::new().unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ca = Arc::clone(&ca);
                thread::spawn(move || {
                    (0..8)
                        .map(|i| {
                            let key = ca.fetch(&format!("host-{}-{}.example.com", t, i)).unwrap();
                            parse(&leaf_der(&key)).raw_serial().to_vec()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let serials: HashSet<Vec<u8>> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(serials.len(), 64);
    }

    #[test]
    fn concurrent_fetch_of_same_host_converges() {
        let ca = Arc::new(CertificateAuthority::new().unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ca = Arc::clone(&ca);
                thread::spawn(move || leaf_der(&ca.fetch("race.example.com").unwrap()))
            })
            .collect();
        let results: Vec<Vec<u8>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let stored = leaf_der(&ca.fetch("race.example.com").unwrap());
        assert!(results.contains(&stored));
        assert_eq!(ca.cached_count(), 1);
    }
}
