//! Certificate issuance for OpenSearch clusters
//!
//! The operator acts as a CA per cluster. It issues node certificates for
//! the transport and HTTP interfaces (one shared certificate or one per
//! pod) and a client certificate for the admin identity used by the
//! security-config applier.
//!
//! Private keys are serialized as PKCS#8 PEM, which is what the engine's
//! security plugin expects.

#![deny(missing_docs)]

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

/// Validity of generated CA certificates
pub const CA_VALIDITY_DAYS: i64 = 365 * 5;

/// Validity of generated node and admin certificates
pub const CERT_VALIDITY_DAYS: i64 = 365;

/// Certificates are reissued once this fraction of their lifetime has passed
pub const ROTATION_THRESHOLD: f64 = 0.80;

fn compute_validity(days: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    (now, now + ::time::Duration::days(days))
}

fn unix_now() -> i64 {
    ::time::OffsetDateTime::now_utc().unix_timestamp()
}

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate or key parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Validity and identity of an issued certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
}

impl CertificateInfo {
    /// Parse certificate info from PEM
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        Self::from_der(&parse_pem(pem_data)?)
    }

    /// Parse certificate info from DER
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let dns_names = cert
            .subject_alternative_name()
            .ok()
            .flatten()
            .map(|ext| {
                ext.value
                    .general_names
                    .iter()
                    .filter_map(|n| match n {
                        GeneralName::DNSName(name) => Some(name.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
            dns_names,
        })
    }

    /// Total lifetime in seconds
    pub fn lifetime_secs(&self) -> i64 {
        self.not_after - self.not_before
    }

    /// Seconds until expiry
    pub fn remaining_secs(&self) -> i64 {
        self.not_after - unix_now()
    }

    /// Whether the certificate has expired
    pub fn is_expired(&self) -> bool {
        self.remaining_secs() <= 0
    }

    /// Whether the certificate is past the rotation threshold
    pub fn needs_rotation(&self) -> bool {
        let lifetime = self.lifetime_secs() as f64;
        if lifetime <= 0.0 {
            return true;
        }
        let age = (unix_now() - self.not_before) as f64;
        age / lifetime >= ROTATION_THRESHOLD
    }

    /// Whether every given DNS name is covered
    pub fn covers(&self, names: &[String]) -> bool {
        names.iter().all(|n| self.dns_names.contains(n))
    }
}

/// What an issued certificate is used for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertUsage {
    /// Engine node: serves TLS and authenticates to peers
    Node,
    /// Client identity such as the admin certificate
    Client,
}

/// Parameters of a certificate to issue
#[derive(Clone, Debug)]
pub struct CertRequest {
    /// Subject common name
    pub common_name: String,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
    /// Intended usage
    pub usage: CertUsage,
}

impl CertRequest {
    /// Node certificate with the given SANs
    pub fn node(common_name: impl Into<String>, dns_names: Vec<String>) -> Self {
        Self {
            common_name: common_name.into(),
            dns_names,
            usage: CertUsage::Node,
        }
    }

    /// Client certificate
    pub fn client(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            dns_names: Vec::new(),
            usage: CertUsage::Client,
        }
    }
}

/// Certificate and private key in PEM
#[derive(Clone, Debug)]
pub struct IssuedCert {
    /// Certificate PEM
    pub cert_pem: String,
    /// PKCS#8 private key PEM
    pub key_pem: String,
}

/// Distinguished name string of a subject as the security plugin matches it
pub fn subject_dn(common_name: &str) -> String {
    format!("CN={}", common_name)
}

/// Certificate authority of one cluster
#[derive(Clone)]
pub struct CertificateAuthority {
    ca_key_pem: String,
    ca_cert_pem: String,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("ca_cert_pem", &self.ca_cert_pem)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Create a new self-signed CA
    pub fn new(common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let (not_before, not_after) = compute_validity(CA_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e))
        })?;
        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
        })?;

        Ok(Self {
            ca_key_pem: key_pair.serialize_pem(),
            ca_cert_pem: cert.pem(),
        })
    }

    /// Load a CA from PEM, validating both halves
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA key: {}", e)))?;
        parse_pem(cert_pem)?;

        Ok(Self {
            ca_key_pem: key_pem.to_string(),
            ca_cert_pem: cert_pem.to_string(),
        })
    }

    /// CA certificate PEM
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// CA private key PEM
    pub fn ca_key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    /// Validity of the CA certificate
    pub fn cert_info(&self) -> Result<CertificateInfo> {
        CertificateInfo::from_pem(&self.ca_cert_pem)
    }

    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))
    }

    /// Issue a certificate signed by this CA
    pub fn issue(&self, request: &CertRequest) -> Result<IssuedCert> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(request.common_name.clone()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = match request.usage {
            CertUsage::Node => vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ],
            CertUsage::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
        };

        let (not_before, not_after) = compute_validity(CERT_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        params.subject_alt_names = request
            .dns_names
            .iter()
            .map(|name| {
                Ia5String::try_from(name.clone())
                    .map(SanType::DnsName)
                    .map_err(|e| {
                        PkiError::CertificateGenerationFailed(format!(
                            "invalid DNS name '{}': {}",
                            name, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate key: {}", e))
        })?;

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;
        let cert = params.signed_by(&key, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!(
                "failed to sign certificate for {}: {}",
                request.common_name, e
            ))
        })?;

        Ok(IssuedCert {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    /// Whether a certificate was signed by this CA
    pub fn signed(&self, cert_pem: &str) -> Result<bool> {
        let cert_der = parse_pem(cert_pem)?;
        let (_, cert) = X509Certificate::from_der(&cert_der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;
        let ca_der = parse_pem(&self.ca_cert_pem)?;
        let (_, ca_cert) = X509Certificate::from_der(&ca_der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;
        Ok(cert.verify_signature(Some(ca_cert.public_key())).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sans() -> Vec<String> {
        vec![
            "logs".to_string(),
            "logs.search".to_string(),
            "logs.search.svc".to_string(),
            "logs.search.svc.cluster.local".to_string(),
        ]
    }

    #[test]
    fn ca_can_be_created_and_reloaded() {
        let ca = CertificateAuthority::new("logs-ca").expect("CA creation should succeed");
        assert!(ca.ca_cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(ca.ca_key_pem().contains("BEGIN PRIVATE KEY"));

        let reloaded = CertificateAuthority::from_pem(ca.ca_cert_pem(), ca.ca_key_pem())
            .expect("reload should succeed");
        let info = reloaded.cert_info().expect("CA info should parse");
        assert_eq!(info.common_name, "logs-ca");
        assert!(!info.needs_rotation());
    }

    #[test]
    fn node_cert_carries_cn_and_sans() {
        let ca = CertificateAuthority::new("logs-ca").expect("CA creation should succeed");
        let issued = ca
            .issue(&CertRequest::node("logs", sans()))
            .expect("issue should succeed");

        assert!(issued.key_pem.contains("BEGIN PRIVATE KEY"));
        let info = CertificateInfo::from_pem(&issued.cert_pem).expect("cert should parse");
        assert_eq!(info.common_name, "logs");
        assert!(info.covers(&sans()));
        assert!(!info.covers(&["other.search".to_string()]));
        assert!(info.remaining_secs() > 0);
    }

    #[test]
    fn issued_certs_verify_against_their_ca_only() {
        let ca = CertificateAuthority::new("logs-ca").expect("CA creation should succeed");
        let other = CertificateAuthority::new("other-ca").expect("CA creation should succeed");
        let admin = ca
            .issue(&CertRequest::client("admin"))
            .expect("issue should succeed");

        assert!(ca.signed(&admin.cert_pem).expect("verify should run"));
        assert!(!other.signed(&admin.cert_pem).expect("verify should run"));
    }

    #[test]
    fn invalid_material_is_rejected() {
        assert!(matches!(
            CertificateAuthority::from_pem("not a cert", "not a key"),
            Err(PkiError::ParseError(_))
        ));
        assert!(CertificateInfo::from_pem("garbage").is_err());
    }

    #[test]
    fn invalid_dns_name_is_rejected() {
        let ca = CertificateAuthority::new("logs-ca").expect("CA creation should succeed");
        let result = ca.issue(&CertRequest::node("logs", vec!["bad name é".to_string()]));
        assert!(matches!(result, Err(PkiError::CertificateGenerationFailed(_))));
    }

    #[test]
    fn dn_format() {
        assert_eq!(subject_dn("logs-masters-0"), "CN=logs-masters-0");
    }
}
