//! Host certificate authority and certificate inspection
//!
//! The agent acts as a private CA. A controller generates its own key pair
//! and sends only a CSR (sealed under the pairing key); the agent signs it
//! and never sees the controller's private key.
//!
//! # Issuance policy
//!
//! - Subject and Subject Alternative Name are copied from the CSR; a CSR
//!   without a SAN is refused
//! - Issued certificates are explicitly not CAs
//! - Key usages: digital signature, content commitment, data and key
//!   encipherment; extended usages: server and client auth
//! - Ten year validity from the moment of issuance, random positive serial

use chrono::{Datelike, Duration, Utc};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use thiserror::Error;
use x509_parser::prelude::*;

/// Validity of the CA and of every issued certificate
pub const VALIDITY_DAYS: i64 = 3650;

const SERIAL_LEN: usize = 20;

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// The CSR could not be parsed
    #[error("invalid CSR: {0}")]
    InvalidCsr(String),

    /// The CSR carries no Subject Alternative Name
    #[error("CSR has no subject alternative name")]
    MissingSubjectAltName,

    /// A name is not usable as a DNS SAN
    #[error("invalid DNS name: {0}")]
    InvalidName(String),

    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate parsing error
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

fn dns_san(name: &str) -> Result<SanType> {
    let ia5 = Ia5String::try_from(name.to_string())
        .map_err(|e| PkiError::InvalidName(format!("{}: {}", name, e)))?;
    Ok(SanType::DnsName(ia5))
}

fn random_serial() -> Result<SerialNumber> {
    let mut bytes = [0u8; SERIAL_LEN];
    aws_lc_rs::rand::fill(&mut bytes).map_err(|_| {
        PkiError::CertificateGenerationFailed("failed to generate serial number".to_string())
    })?;
    // Positive and non-zero
    bytes[0] &= 0x7F;
    bytes[0] |= 0x01;
    Ok(SerialNumber::from_slice(&bytes))
}

/// Set not_before to today and not_after to today + VALIDITY_DAYS
fn apply_validity(params: &mut CertificateParams) {
    let today = Utc::now().date_naive();
    let expiry = today + Duration::days(VALIDITY_DAYS);
    params.not_before = rcgen::date_time_ymd(today.year(), today.month() as u8, today.day() as u8);
    params.not_after =
        rcgen::date_time_ymd(expiry.year(), expiry.month() as u8, expiry.day() as u8);
}

/// Certificate Authority held by the agent
pub struct CertificateAuthority {
    /// CA key pair serialized as PEM (KeyPair isn't Clone)
    ca_key_pem: String,
    /// PEM-encoded CA certificate, also sent to controllers as the host certificate
    ca_cert_pem: String,
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
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("MASC pairing".to_string()),
        );
        params.distinguished_name = dn;
        params.subject_alt_names = vec![dns_san(common_name)?];

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::ContentCommitment,
            KeyUsagePurpose::DataEncipherment,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::KeyAgreement,
            KeyUsagePurpose::CrlSign,
        ];
        params.serial_number = Some(random_serial()?);
        apply_validity(&mut params);

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e))
        })?;

        let ca_key_pem = key_pair.serialize_pem();

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
        })?;

        Ok(Self {
            ca_key_pem,
            ca_cert_pem: cert.pem(),
        })
    }

    /// Load CA from PEM
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key = KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA key: {}", e)))?;

        Issuer::from_ca_cert_pem(cert_pem, &key)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;

        Ok(Self {
            ca_key_pem: key_pem.to_string(),
            ca_cert_pem: cert_pem.to_string(),
        })
    }

    /// The CA certificate in PEM format
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// The CA private key in PEM format
    pub fn ca_key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))
    }

    /// Sign a CSR and return the certificate in PEM format
    ///
    /// Subject and SAN come from the CSR; everything else is overridden by
    /// the issuance policy.
    pub fn issue_from_csr(&self, csr_pem: &str) -> Result<String> {
        let mut csr_params = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| PkiError::InvalidCsr(format!("failed to parse CSR: {}", e)))?;

        if csr_params.params.subject_alt_names.is_empty() {
            return Err(PkiError::MissingSubjectAltName);
        }

        let params = &mut csr_params.params;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::ContentCommitment,
            KeyUsagePurpose::DataEncipherment,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(random_serial()?);
        apply_validity(params);

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;

        let signed_cert = csr_params.signed_by(&issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign certificate: {}", e))
        })?;

        Ok(signed_cert.pem())
    }
}

/// Controller certificate request (key pair and CSR generated locally)
pub struct PeerCertRequest {
    /// Private key PEM, never sent
    key_pem: String,
    /// CSR in PEM format
    csr_pem: String,
}

impl PeerCertRequest {
    /// Generate a new key pair and a CSR naming `dns_name` as CN and SAN
    pub fn new(dns_name: &str) -> Result<Self> {
        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate peer key: {}", e))
        })?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(dns_name.to_string()));
        params.distinguished_name = dn;
        params.subject_alt_names = vec![dns_san(dns_name)?];

        let csr = params.serialize_request(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CSR: {}", e))
        })?;

        let csr_pem = csr.pem().map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to serialize CSR: {}", e))
        })?;

        Ok(Self {
            key_pem: key_pair.serialize_pem(),
            csr_pem,
        })
    }

    /// The CSR in PEM format
    pub fn csr_pem(&self) -> &str {
        &self.csr_pem
    }

    /// The private key in PEM format
    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }
}

/// DNS Subject Alternative Names of a PEM certificate
pub fn dns_names(cert_pem: &str) -> Result<Vec<String>> {
    let der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;
    Ok(collect_dns_names(&cert))
}

fn collect_dns_names(cert: &X509Certificate<'_>) -> Vec<String> {
    match cert.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn common_name(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

/// Hostname a certificate identifies: the first DNS SAN, else the CN
pub fn certificate_hostname(cert_pem: &str) -> Result<String> {
    let der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

    collect_dns_names(&cert)
        .into_iter()
        .next()
        .or_else(|| common_name(&cert))
        .ok_or_else(|| PkiError::ParseError("certificate names no host".to_string()))
}

/// Result of checking a certificate against a CA
#[derive(Debug, Clone)]
pub struct VerificationResult {
    /// Hostname the certificate identifies (empty when invalid)
    pub hostname: String,
    /// Whether the certificate is valid
    pub valid: bool,
    /// Reason if invalid
    pub reason: Option<String>,
}

impl VerificationResult {
    fn invalid(reason: &str) -> Self {
        Self {
            hostname: String::new(),
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Check that a PEM certificate was signed by the given CA and is in its validity window
pub fn verify_issued_by(cert_pem: &str, ca_cert_pem: &str) -> Result<VerificationResult> {
    let cert_der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

    let ca_cert_der = parse_pem(ca_cert_pem)?;
    let (_, ca_cert) = X509Certificate::from_der(&ca_cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;

    if cert.verify_signature(Some(ca_cert.public_key())).is_err() {
        return Ok(VerificationResult::invalid("signature verification failed"));
    }

    if cert.issuer() != ca_cert.subject() {
        return Ok(VerificationResult::invalid("issuer does not match CA subject"));
    }

    let now = Utc::now().timestamp();
    if now < cert.validity().not_before.timestamp() {
        return Ok(VerificationResult::invalid("certificate not yet valid"));
    }
    if now > cert.validity().not_after.timestamp() {
        return Ok(VerificationResult::invalid("certificate expired"));
    }

    let hostname = collect_dns_names(&cert)
        .into_iter()
        .next()
        .or_else(|| common_name(&cert))
        .unwrap_or_default();

    Ok(VerificationResult {
        hostname,
        valid: true,
        reason: None,
    })
}
