//! Intermediate CA Certificate Generation Module
//!
//! This module creates intermediate CA certificates signed by a root CA or by
//! another intermediate. Intermediates let the root stay offline while still
//! issuing, and may themselves delegate further as long as every level stays
//! within what its issuer was granted.
//!
//! # CA Hierarchy Position
//! ```text
//! Root CA (self-signed)
//!   └── Intermediate CA (signed by Root) ← This module
//!         └── Intermediate CA (signed by Intermediate) ← This module
//!               └── Leaf Certificate
//! ```
//!
//! # Certificate Properties
//! - **Signed by**: the parent CA's key; AKI = parent SKI
//! - **Serial Number**: allocated from the parent's CA record
//! - **Key Usage**: keyCertSign, cRLSign unless overridden
//! - **Basic Constraints**: CA=true, pathlen from the request, checked against the parent
//! - **Default Validity**: 5 years
//! - **Revocation URLs**: the intermediate's own endpoints, not the parent's
//!
//! # Path Length Rules
//! ```text
//! parent unlimited   any child allowed
//! parent 0           no child CA at all
//! parent p > 0       child must be 0..=p (not unlimited)
//! ```

use crate::cert_template::{
    CertTemplate, ExtKeyUsage, KeyUsageSet, Validity, DEFAULT_VALIDITY_YEARS,
};
use crate::chain_state::{CaKind, CaRecord, CertificateAuthority, RevocationUrls};
use crate::error::Result;
use crate::inspect;
use crate::key_pair::{self, KeySpec};
use crate::path_len::{self, MaxPathLen};
use crate::serial_allocator::{self, SerialSource};
use crate::signing::{self, Issuer};
use crate::subject::Subject;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Default pathlen for a new intermediate: may only sign leaves.
const INTERMEDIATE_CA_PATH_LENGTH: MaxPathLen = MaxPathLen::Limited(0);

/// Builder for intermediate CA key pairs and certificates signed by a parent CA
///
/// # Examples
/// ```rust,no_run
/// # use myca::chain_state::CertificateAuthority;
/// # use myca::generate_intermediate_ca::IntermediateCABuilder;
/// # use myca::path_len::MaxPathLen;
/// # use myca::serial_allocator::OsSerialSource;
/// # use myca::subject::Subject;
/// # fn example(root: &CertificateAuthority) -> myca::Result<()> {
/// let mut subject = Subject::new();
/// subject.set("CN", &["Example Issuing CA"])?;
///
/// let (ica, updated_root_record) = IntermediateCABuilder::new()
///     .subject(subject)
///     .max_path_len(MaxPathLen::Limited(0))
///     .build(root, "myca-home/ica/Example-Issuing-CA/ca-info.json", &mut OsSerialSource)?;
///
/// // Persist `updated_root_record` before treating `ica` as issued
/// # Ok(())
/// # }
/// ```
pub struct IntermediateCABuilder {
    subject: Subject,
    key_spec: KeySpec,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    validity_days: Option<u32>,
    max_path_len: MaxPathLen,
    key_usage: KeyUsageSet,
    ext_key_usage: Vec<ExtKeyUsage>,
    urls: RevocationUrls,
}

impl Default for IntermediateCABuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IntermediateCABuilder {
    /// Create a new intermediate CA builder with default values
    pub fn new() -> Self {
        Self {
            subject: Subject::new(),
            key_spec: KeySpec::default(),
            not_before: None,
            not_after: None,
            validity_days: None,
            max_path_len: INTERMEDIATE_CA_PATH_LENGTH,
            key_usage: KeyUsageSet::ca_default(),
            ext_key_usage: Vec::new(),
            urls: RevocationUrls::default(),
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

    /// Set validity period in days
    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = Some(days);
        self
    }

    /// Set the maximum path length requested for the new CA
    pub fn max_path_len(mut self, max_path_len: MaxPathLen) -> Self {
        self.max_path_len = max_path_len;
        self
    }

    pub fn key_usage(mut self, key_usage: KeyUsageSet) -> Self {
        self.key_usage = key_usage;
        self
    }

    pub fn ext_key_usage(mut self, ext_key_usage: Vec<ExtKeyUsage>) -> Self {
        self.ext_key_usage = ext_key_usage;
        self
    }

    /// Set the intermediate's own OCSP, CA Issuers and CRL URLs
    pub fn revocation_urls(mut self, urls: RevocationUrls) -> Self {
        self.urls = urls;
        self
    }

    /// Build the intermediate CA under `parent`
    ///
    /// # Returns
    /// The new CA (its record bound to `record_path`, not yet written) and a
    /// copy of the parent's record with the serial cursor advanced. The
    /// parent itself is not modified; on error nothing needs to be undone.
    ///
    /// # Errors
    /// - [`crate::CaError::PathLenViolation`] if the requested path length
    ///   exceeds the parent's, or the parent is not a CA
    /// - [`crate::CaError::SigningError`] if key generation or signing fails
    pub fn build<S: SerialSource + ?Sized>(
        mut self,
        parent: &CertificateAuthority,
        record_path: impl Into<PathBuf>,
        source: &mut S,
    ) -> Result<(CertificateAuthority, CaRecord)> {
        let parent_limit = inspect::max_path_len(&parent.cert)?;
        path_len::check_child(parent_limit, self.max_path_len)?;

        self.subject
            .ensure_common_name(None, &mut rand::thread_rng());

        let validity = Validity::from_request(
            self.not_before,
            self.not_after,
            self.validity_days,
            DEFAULT_VALIDITY_YEARS,
        )?;

        let key = key_pair::generate(&self.key_spec)?;

        let mut parent_record = parent.record.clone();
        let serial = serial_allocator::next_serial(&mut parent_record, source)?;
        let record =
            CaRecord::create(record_path, CaKind::Intermediate, self.urls.clone(), source)?;

        let template = CertTemplate::ca(self.subject, validity, self.max_path_len, self.urls)
            .with_key_usage(self.key_usage)
            .with_ext_key_usage(self.ext_key_usage);
        let signed = signing::issue(
            &template,
            &serial,
            &key,
            Issuer::Parent {
                cert: &parent.cert,
                key: &parent.key,
                fullchain: &parent.fullchain,
            },
        )?;

        tracing::info!(
            cn = template.subject.common_name(),
            parent = %parent.common_name(),
            path_len = %self.max_path_len,
            "intermediate CA created"
        );

        Ok((
            CertificateAuthority {
                cert: signed.cert,
                key,
                fullchain: signed.fullchain,
                record,
            },
            parent_record,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaError;
    use crate::generate_root_ca::RootCABuilder;
    use crate::serial_allocator::ScriptedSerialSource;
    use tempfile::TempDir;

    fn subject(cn: &str) -> Subject {
        let mut s = Subject::new();
        s.set("CN", &[cn]).unwrap();
        s
    }

    fn root(dir: &TempDir, path_len: MaxPathLen) -> CertificateAuthority {
        RootCABuilder::new()
            .subject(subject("Root1"))
            .max_path_len(path_len)
            .validity_days(30)
            .build(dir.path().join("root.json"), &mut ScriptedSerialSource::new([1000]))
            .unwrap()
    }

    #[test]
    fn test_intermediate_signed_by_root() {
        let dir = TempDir::new().unwrap();
        let root = root(&dir, MaxPathLen::Unlimited);
        let mut source = ScriptedSerialSource::new([24, 5000]);

        let (ica, parent_record) = IntermediateCABuilder::new()
            .subject(subject("CA1"))
            .max_path_len(MaxPathLen::Limited(2))
            .validity_days(10)
            .build(&root, dir.path().join("ca1.json"), &mut source)
            .unwrap();

        let summary = inspect::summarize(&ica.cert).unwrap();
        assert_eq!(summary.serial, "0400");
        assert_eq!(summary.max_path_len, Some(2));
        assert_eq!(
            summary.authority_key_id,
            inspect::summarize(&root.cert).unwrap().subject_key_id
        );
        assert!(ica.cert.verify(&root.key).unwrap());

        assert_eq!(parent_record.serial_cursor().to_hex(), "0400");
        assert_eq!(root.record.serial_cursor().to_hex(), "03E8");
        assert_eq!(ica.record.serial_cursor().to_hex(), "1388");
        assert_eq!(ica.record.kind(), CaKind::Intermediate);

        let chain = openssl::x509::X509::stack_from_pem(&ica.fullchain).unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_path_len_violation_leaves_parent_untouched() {
        let dir = TempDir::new().unwrap();
        let root = root(&dir, MaxPathLen::Limited(1));
        let mut source = ScriptedSerialSource::new([7, 7]);

        let err = IntermediateCABuilder::new()
            .subject(subject("Too Deep"))
            .max_path_len(MaxPathLen::Limited(2))
            .build(&root, dir.path().join("deep.json"), &mut source)
            .unwrap_err();

        assert!(matches!(err, CaError::PathLenViolation(_)));
        assert_eq!(source.remaining(), 2);
        assert_eq!(root.record.serial_cursor().to_hex(), "03E8");
    }

    #[test]
    fn test_unlimited_child_under_limited_parent() {
        let dir = TempDir::new().unwrap();
        let root = root(&dir, MaxPathLen::Limited(3));
        let err = IntermediateCABuilder::new()
            .max_path_len(MaxPathLen::Unlimited)
            .build(&root, dir.path().join("x.json"), &mut ScriptedSerialSource::new([1, 1]))
            .unwrap_err();
        assert!(matches!(err, CaError::PathLenViolation(_)));
    }

    #[test]
    fn test_intermediate_uses_own_urls() {
        let dir = TempDir::new().unwrap();
        let root_urls = RevocationUrls::parse(&["https://ocsp.root.example"], &[], &[]).unwrap();
        let root = RootCABuilder::new()
            .subject(subject("Root1"))
            .revocation_urls(root_urls)
            .build(dir.path().join("root.json"), &mut ScriptedSerialSource::new([1]))
            .unwrap();

        let ica_urls = RevocationUrls::parse(
            &["https://ocsp.ica.example"],
            &["http://ica.example/ica.cer"],
            &["http://ica.example/ica.crl"],
        )
        .unwrap();
        let (ica, _) = IntermediateCABuilder::new()
            .subject(subject("CA1"))
            .revocation_urls(ica_urls)
            .build(&root, dir.path().join("ica.json"), &mut ScriptedSerialSource::new([2, 3]))
            .unwrap();

        let summary = inspect::summarize(&ica.cert).unwrap();
        assert_eq!(summary.ocsp_urls, vec!["https://ocsp.ica.example/"]);
        assert_eq!(summary.issuer_urls, vec!["http://ica.example/ica.cer"]);
        assert_eq!(summary.crl_urls, vec!["http://ica.example/ica.crl"]);
    }
}
