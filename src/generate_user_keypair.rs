//! Leaf Certificate Generation Module
//!
//! This module issues end-entity certificates bound to domains, IP addresses,
//! email addresses or URIs. A leaf is either signed by a root or intermediate
//! CA, or self-signed when no CA is involved at all.
//!
//! # CA Hierarchy Position
//! ```text
//! Root CA (self-signed)
//!   └── Intermediate CA (signed by Root)
//!       └── Leaf Certificate (signed by Root or Intermediate) ← This module
//!
//! Self-signed Leaf ← This module, no hierarchy
//! ```
//!
//! # Certificate Properties
//! - **Basic Constraints**: CA=false
//! - **Key Usage**: digitalSignature, keyEncipherment unless overridden
//! - **Subject Alternative Name**: validated domains, IPs, emails, URIs
//! - **Revocation URLs**: the issuing CA's endpoints (own URLs when self-signed)
//! - **Serial Number**: from the issuing CA's record, or random in `[1, 2^40)`
//!   when self-signed
//! - **Default Validity**: 5 years
//!
//! An empty CN is filled from the first SAN entry (domain, then IP, email,
//! URI) or a random name when there are no SAN entries.

use crate::cert_template::{
    CertTemplate, ExtKeyUsage, KeyUsageSet, SubjectAltNames, Validity, DEFAULT_VALIDITY_YEARS,
};
use crate::chain_state::{CaRecord, CertRecord, CertificateAuthority, RevocationUrls};
use crate::error::Result;
use crate::inspect;
use crate::key_pair::{self, KeySpec};
use crate::serial_allocator::{self, SerialSource};
use crate::signing::{self, Issuer};
use crate::subject::Subject;
use chrono::{DateTime, Utc};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use std::path::PathBuf;

/// An issued leaf: key, certificate, chain and issuance record.
pub struct IssuedCert {
    pub cert: X509,
    pub key: PKey<Private>,
    pub fullchain: Vec<u8>,
    pub record: CertRecord,
}

/// Builder for leaf key pairs and certificates
///
/// # Examples
/// ```rust,no_run
/// # use myca::cert_template::{ExtKeyUsage, SubjectAltNames};
/// # use myca::chain_state::CertificateAuthority;
/// # use myca::generate_user_keypair::UserCertBuilder;
/// # use myca::serial_allocator::OsSerialSource;
/// # fn example(ica: &CertificateAuthority) -> myca::Result<()> {
/// let mut san = SubjectAltNames::new();
/// san.add_domain("example.com")?;
/// san.add_domain("*.example.com")?;
///
/// let (leaf, updated_ca_record) = UserCertBuilder::new()
///     .subject_alt_names(san)
///     .ext_key_usage(vec![ExtKeyUsage::ServerAuth])
///     .validity_days(398)
///     .build(ica, "myca-home/cert/example.com/cert-info.json", &mut OsSerialSource)?;
/// # Ok(())
/// # }
/// ```
pub struct UserCertBuilder {
    subject: Subject,
    key_spec: KeySpec,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    validity_days: Option<u32>,
    key_usage: KeyUsageSet,
    ext_key_usage: Vec<ExtKeyUsage>,
    san: SubjectAltNames,
}

impl Default for UserCertBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UserCertBuilder {
    pub fn new() -> Self {
        Self {
            subject: Subject::new(),
            key_spec: KeySpec::default(),
            not_before: None,
            not_after: None,
            validity_days: None,
            key_usage: KeyUsageSet::leaf_default(),
            ext_key_usage: Vec::new(),
            san: SubjectAltNames::new(),
        }
    }

    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }

    pub fn key_spec(mut self, key_spec: KeySpec) -> Self {
        self.key_spec = key_spec;
        self
    }

    pub fn not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    pub fn not_after(mut self, not_after: DateTime<Utc>) -> Self {
        self.not_after = Some(not_after);
        self
    }

    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = Some(days);
        self
    }

    pub fn key_usage(mut self, key_usage: KeyUsageSet) -> Self {
        self.key_usage = key_usage;
        self
    }

    /// Set extended key usages; an empty list omits the extension
    pub fn ext_key_usage(mut self, ext_key_usage: Vec<ExtKeyUsage>) -> Self {
        self.ext_key_usage = ext_key_usage;
        self
    }

    pub fn subject_alt_names(mut self, san: SubjectAltNames) -> Self {
        self.san = san;
        self
    }

    fn prepare(&mut self) -> Result<Validity> {
        let hints = (!self.san.is_empty()).then_some(&self.san);
        self.subject.ensure_common_name(hints, &mut rand::thread_rng());
        Validity::from_request(
            self.not_before,
            self.not_after,
            self.validity_days,
            DEFAULT_VALIDITY_YEARS,
        )
    }

    /// Issue the leaf under `issuer`
    ///
    /// Returns the leaf and a copy of the issuer's record with the serial
    /// cursor advanced; the issuer is not modified.
    pub fn build<S: SerialSource + ?Sized>(
        mut self,
        issuer: &CertificateAuthority,
        record_path: impl Into<PathBuf>,
        source: &mut S,
    ) -> Result<(IssuedCert, CaRecord)> {
        let validity = self.prepare()?;
        let key = key_pair::generate(&self.key_spec)?;

        let mut issuer_record = issuer.record.clone();
        let serial = serial_allocator::next_serial(&mut issuer_record, source)?;

        let urls = issuer.record.urls().clone();
        let template = CertTemplate::leaf(self.subject, validity, self.san, urls.clone())
            .with_key_usage(self.key_usage)
            .with_ext_key_usage(self.ext_key_usage);
        let signed = signing::issue(
            &template,
            &serial,
            &key,
            Issuer::Parent {
                cert: &issuer.cert,
                key: &issuer.key,
                fullchain: &issuer.fullchain,
            },
        )?;

        let summary = inspect::summarize(&signed.cert)?;
        let record = CertRecord::new(record_path, summary.serial, summary.issuer, false, urls);

        tracing::info!(
            cn = template.subject.common_name(),
            issuer = %issuer.common_name(),
            "leaf certificate issued"
        );

        Ok((
            IssuedCert {
                cert: signed.cert,
                key,
                fullchain: signed.fullchain,
                record,
            },
            issuer_record,
        ))
    }

    /// Issue a self-signed leaf advertising `urls` as its own endpoints
    pub fn build_self_signed<S: SerialSource + ?Sized>(
        mut self,
        urls: RevocationUrls,
        record_path: impl Into<PathBuf>,
        source: &mut S,
    ) -> Result<IssuedCert> {
        let validity = self.prepare()?;
        let key = key_pair::generate(&self.key_spec)?;
        let serial = serial_allocator::random_serial(source)?;

        let template = CertTemplate::leaf(self.subject, validity, self.san, urls.clone())
            .with_key_usage(self.key_usage)
            .with_ext_key_usage(self.ext_key_usage);
        let signed = signing::issue(&template, &serial, &key, Issuer::SelfSigned)?;

        let summary = inspect::summarize(&signed.cert)?;
        let record = CertRecord::new(record_path, summary.serial, summary.issuer, true, urls);

        tracing::info!(cn = template.subject.common_name(), "self-signed certificate issued");

        Ok(IssuedCert {
            cert: signed.cert,
            key,
            fullchain: signed.fullchain,
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_root_ca::RootCABuilder;
    use crate::serial_allocator::ScriptedSerialSource;
    use tempfile::TempDir;

    fn root(dir: &TempDir) -> CertificateAuthority {
        let mut subject = Subject::new();
        subject.set("CN", &["Root1"]).unwrap();
        RootCABuilder::new()
            .subject(subject)
            .revocation_urls(
                RevocationUrls::parse(
                    &["https://ocsp.example.com"],
                    &["http://ca.example.com/root.cer"],
                    &["http://crl.example.com/root.crl"],
                )
                .unwrap(),
            )
            .build(dir.path().join("root.json"), &mut ScriptedSerialSource::new([10]))
            .unwrap()
    }

    #[test]
    fn test_leaf_inherits_issuer_urls() {
        let dir = TempDir::new().unwrap();
        let root = root(&dir);
        let mut san = SubjectAltNames::new();
        san.add_domain("example.com").unwrap();

        let (leaf, record) = UserCertBuilder::new()
            .subject_alt_names(san)
            .build(&root, dir.path().join("leaf.json"), &mut ScriptedSerialSource::new([5]))
            .unwrap();

        let summary = inspect::summarize(&leaf.cert).unwrap();
        assert_eq!(summary.ocsp_urls, vec!["https://ocsp.example.com/"]);
        assert_eq!(summary.issuer_urls, vec!["http://ca.example.com/root.cer"]);
        assert_eq!(summary.crl_urls, vec!["http://crl.example.com/root.crl"]);
        assert_eq!(summary.dns_names, vec!["example.com"]);
        assert!(summary.subject.contains("CN=example.com"));
        assert!(!summary.is_ca);
        assert_eq!(summary.key_usage, "digital-signature,key-encipherment");
        assert_eq!(summary.serial, "0F");

        assert_eq!(record.serial_cursor().to_hex(), "0F");
        assert_eq!(leaf.record.serial, "0F");
        assert!(!leaf.record.self_signed);
        assert_eq!(&leaf.record.urls, root.record.urls());
    }

    #[test]
    fn test_leaf_san_and_eku() {
        let dir = TempDir::new().unwrap();
        let root = root(&dir);
        let mut san = SubjectAltNames::new();
        san.add_ip("10.1.2.3").unwrap();
        san.add_email("ops@example.com").unwrap();
        san.add_uri("https://svc.example.com/id").unwrap();

        let (leaf, _) = UserCertBuilder::new()
            .subject_alt_names(san)
            .ext_key_usage(vec![ExtKeyUsage::ServerAuth, ExtKeyUsage::ClientAuth])
            .build(&root, dir.path().join("leaf.json"), &mut ScriptedSerialSource::new([1]))
            .unwrap();

        let summary = inspect::summarize(&leaf.cert).unwrap();
        assert!(summary.subject.contains("CN=10.1.2.3"));
        assert_eq!(summary.ip_addresses, vec!["10.1.2.3"]);
        assert_eq!(summary.emails, vec!["ops@example.com"]);
        assert_eq!(summary.uris, vec!["https://svc.example.com/id"]);
        assert_eq!(summary.ext_key_usage, vec!["server-auth", "client-auth"]);
    }

    #[test]
    fn test_self_signed_leaf() {
        let dir = TempDir::new().unwrap();
        let urls = RevocationUrls::parse(&["http://ocsp.self.example"], &[], &[]).unwrap();
        let mut san = SubjectAltNames::new();
        san.add_domain("self.example").unwrap();

        let leaf = UserCertBuilder::new()
            .subject_alt_names(san)
            .build_self_signed(
                urls,
                dir.path().join("self.json"),
                &mut ScriptedSerialSource::new([0, 99]),
            )
            .unwrap();

        let summary = inspect::summarize(&leaf.cert).unwrap();
        assert_eq!(summary.serial, "63");
        assert_eq!(summary.subject, summary.issuer);
        assert_eq!(summary.subject_key_id, summary.authority_key_id);
        assert_eq!(summary.ocsp_urls, vec!["http://ocsp.self.example/"]);
        assert!(leaf.record.self_signed);
        assert!(leaf.cert.verify(&leaf.key).unwrap());
        assert_eq!(leaf.fullchain, leaf.cert.to_pem().unwrap());
    }

    #[test]
    fn test_leaf_without_san_uses_username_common_name() {
        let dir = TempDir::new().unwrap();
        let root = root(&dir);

        let (leaf, _) = UserCertBuilder::new()
            .build(&root, dir.path().join("leaf.json"), &mut ScriptedSerialSource::new([3]))
            .unwrap();

        let cn = leaf
            .cert
            .subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        let (name, suffix) = cn.rsplit_once('-').unwrap();
        assert!(!name.is_empty(), "{cn}");
        assert_eq!(suffix.len(), 2, "{cn}");
        assert!(suffix.bytes().all(|b| b.is_ascii_digit()), "{cn}");
        assert!(inspect::summarize(&leaf.cert).unwrap().dns_names.is_empty());
    }
}
