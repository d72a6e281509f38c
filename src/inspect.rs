//! Parse-back of issued certificates.
//!
//! Decodes a certificate with `x509-cert` into a [`CertificateSummary`] so
//! issued material can be shown to the operator and checked structurally.
//! The issuance path also uses [`max_path_len`] to read a parent CA's own
//! constraint straight from its certificate.

use crate::cert_template::{ExtKeyUsage, KeyUsageSet};
use crate::error::{CaError, Result};
use crate::path_len::MaxPathLen;
use crate::signing;
use chrono::{DateTime, Utc};
use const_oid::db::rfc5280::{ID_AD_CA_ISSUERS, ID_AD_OCSP};
use const_oid::AssociatedOid;
use der::{Decode, DecodeOwned};
use openssl::x509::X509Ref;
use serde::Serialize;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{
    AuthorityInfoAccessSyntax, AuthorityKeyIdentifier, BasicConstraints, CrlDistributionPoints,
    ExtendedKeyUsage, KeyUsage, KeyUsages, SubjectKeyIdentifier,
};
use x509_cert::time::Time;
use x509_cert::Certificate;

/// Decoded view of an issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateSummary {
    pub serial: String,
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
    /// `None` for leaves, `Some(-1)` for unlimited CAs
    pub max_path_len: Option<i32>,
    pub subject_key_id: Option<String>,
    pub authority_key_id: Option<String>,
    pub key_usage: String,
    pub ext_key_usage: Vec<String>,
    pub ocsp_urls: Vec<String>,
    pub issuer_urls: Vec<String>,
    pub crl_urls: Vec<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<String>,
    pub emails: Vec<String>,
    pub uris: Vec<String>,
}

fn parse(cert: &X509Ref) -> Result<Certificate> {
    let der = cert
        .to_der()
        .map_err(|e| CaError::signing("Failed to encode certificate", e))?;
    Certificate::from_der(&der).map_err(|e| CaError::signing("Failed to decode certificate", e))
}

fn find_extension<T: DecodeOwned + AssociatedOid>(cert: &Certificate) -> Result<Option<T>> {
    let Some(extensions) = cert.tbs_certificate.extensions.as_ref() else {
        return Ok(None);
    };
    extensions
        .iter()
        .find(|ext| ext.extn_id == T::OID)
        .map(|ext| {
            T::from_der(ext.extn_value.as_bytes())
                .map_err(|e| CaError::signing(&format!("Failed to decode extension {}", T::OID), e))
        })
        .transpose()
}

fn to_datetime(time: &Time) -> Result<DateTime<Utc>> {
    let secs = time.to_unix_duration().as_secs() as i64;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CaError::SigningError(format!("timestamp out of range: {}", secs)))
}

fn uri_of(name: &GeneralName) -> Option<String> {
    match name {
        GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
        _ => None,
    }
}

fn key_identifier_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if text.bytes().all(|b| b.is_ascii_hexdigit()) => text.to_string(),
        _ => hex::encode(bytes),
    }
}

fn key_usage_set(usage: &KeyUsage) -> KeyUsageSet {
    let mapping = [
        (KeyUsages::DigitalSignature, KeyUsageSet::DIGITAL_SIGNATURE),
        (KeyUsages::NonRepudiation, KeyUsageSet::CONTENT_COMMITMENT),
        (KeyUsages::KeyEncipherment, KeyUsageSet::KEY_ENCIPHERMENT),
        (KeyUsages::DataEncipherment, KeyUsageSet::DATA_ENCIPHERMENT),
        (KeyUsages::KeyAgreement, KeyUsageSet::KEY_AGREEMENT),
        (KeyUsages::KeyCertSign, KeyUsageSet::CERT_SIGN),
        (KeyUsages::CRLSign, KeyUsageSet::CRL_SIGN),
    ];
    mapping
        .into_iter()
        .filter(|(flag, _)| usage.0.contains(*flag))
        .fold(KeyUsageSet::empty(), |acc, (_, bit)| acc | bit)
}

/// Maximum path length of a CA certificate.
///
/// Fails with [`CaError::PathLenViolation`] when the certificate is not a CA.
pub fn max_path_len(cert: &X509Ref) -> Result<MaxPathLen> {
    let parsed = parse(cert)?;
    match find_extension::<BasicConstraints>(&parsed)? {
        Some(bc) if bc.ca => Ok(match bc.path_len_constraint {
            Some(n) => MaxPathLen::Limited(n),
            None => MaxPathLen::Unlimited,
        }),
        _ => Err(CaError::PathLenViolation(
            "issuer certificate is not a CA".to_string(),
        )),
    }
}

/// Decode `cert` into a [`CertificateSummary`].
pub fn summarize(cert: &X509Ref) -> Result<CertificateSummary> {
    let parsed = parse(cert)?;
    let tbs = &parsed.tbs_certificate;

    let basic = find_extension::<BasicConstraints>(&parsed)?;
    let is_ca = basic.as_ref().map(|bc| bc.ca).unwrap_or(false);
    let max_path_len = basic.filter(|bc| bc.ca).map(|bc| match bc.path_len_constraint {
        Some(n) => n as i32,
        None => -1,
    });

    let subject_key_id = find_extension::<SubjectKeyIdentifier>(&parsed)?
        .map(|ski| key_identifier_text(ski.0.as_bytes()));
    let authority_key_id = find_extension::<AuthorityKeyIdentifier>(&parsed)?
        .and_then(|aki| aki.key_identifier)
        .map(|id| key_identifier_text(id.as_bytes()));

    let key_usage = find_extension::<KeyUsage>(&parsed)?
        .map(|ku| key_usage_set(&ku))
        .unwrap_or_default()
        .to_string();
    let ext_key_usage = find_extension::<ExtendedKeyUsage>(&parsed)?
        .map(|eku| {
            eku.0
                .iter()
                .map(|oid| {
                    let oid = oid.to_string();
                    ExtKeyUsage::from_oid(&oid)
                        .map(|u| u.name().to_string())
                        .unwrap_or(oid)
                })
                .collect()
        })
        .unwrap_or_default();

    let mut ocsp_urls = Vec::new();
    let mut issuer_urls = Vec::new();
    if let Some(aia) = find_extension::<AuthorityInfoAccessSyntax>(&parsed)? {
        for access in &aia.0 {
            let Some(uri) = uri_of(&access.access_location) else {
                continue;
            };
            if access.access_method == ID_AD_OCSP {
                ocsp_urls.push(uri);
            } else if access.access_method == ID_AD_CA_ISSUERS {
                issuer_urls.push(uri);
            }
        }
    }

    let mut crl_urls = Vec::new();
    if let Some(points) = find_extension::<CrlDistributionPoints>(&parsed)? {
        for point in &points.0 {
            if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                crl_urls.extend(names.iter().filter_map(uri_of));
            }
        }
    }

    let mut dns_names = Vec::new();
    let mut ip_addresses = Vec::new();
    let mut emails = Vec::new();
    let mut uris = Vec::new();
    if let Some(names) = cert.subject_alt_names() {
        for name in names.iter() {
            if let Some(dns) = name.dnsname() {
                dns_names.push(dns.to_string());
            } else if let Some(ip) = name.ipaddress() {
                ip_addresses.push(format_ip(ip));
            } else if let Some(email) = name.email() {
                emails.push(email.to_string());
            } else if let Some(uri) = name.uri() {
                uris.push(uri.to_string());
            }
        }
    }

    Ok(CertificateSummary {
        serial: signing::serial_hex(cert)?,
        subject: tbs.subject.to_string(),
        issuer: tbs.issuer.to_string(),
        not_before: to_datetime(&tbs.validity.not_before)?,
        not_after: to_datetime(&tbs.validity.not_after)?,
        is_ca,
        max_path_len,
        subject_key_id,
        authority_key_id,
        key_usage,
        ext_key_usage,
        ocsp_urls,
        issuer_urls,
        crl_urls,
        dns_names,
        ip_addresses,
        emails,
        uris,
    })
}

fn format_ip(raw: &[u8]) -> String {
    match raw.len() {
        4 => {
            let octets: [u8; 4] = [raw[0], raw[1], raw[2], raw[3]];
            std::net::Ipv4Addr::from(octets).to_string()
        }
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(raw);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => hex::encode(raw),
    }
}
