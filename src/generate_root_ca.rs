//! Root CA Certificate Generation Module
//!
//! This module creates self-signed root CA certificates, the trust anchors at
//! the top of a local CA hierarchy, together with the CA record that every
//! later issuance under the root allocates serials from.
//!
//! # CA Hierarchy Position
//! ```text
//! Root CA (self-signed) ← This module
//!   ├── Intermediate CA (signed by Root)
//!   │     └── ... further intermediates, bounded by pathlen
//!   └── Leaf Certificate (signed by Root or any Intermediate)
//! ```
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same, AKI == SKI
//! - **Serial Number**: always 1
//! - **Key Usage**: keyCertSign, cRLSign unless overridden
//! - **Basic Constraints**: CA=true, pathlen from the request (unlimited by default)
//! - **Default Key**: ECDSA P-256
//! - **Default Validity**: 10 years
//! - **Revocation URLs**: the root's own OCSP / CA Issuers / CRL endpoints
//!
//! # Example
//! ```rust,no_run
//! use myca::generate_root_ca::RootCABuilder;
//! use myca::serial_allocator::OsSerialSource;
//! use myca::subject::Subject;
//! # fn example() -> myca::Result<()> {
//!
//! let mut subject = Subject::new();
//! subject.set("O", &["Example Corporation"])?;
//! subject.set("CN", &["Example Root CA"])?;
//!
//! let root = RootCABuilder::new()
//!     .subject(subject)
//!     .validity_days(3650)
//!     .build("myca-home/rca/Example-Root-CA/ca-info.json", &mut OsSerialSource)?;
//! # Ok(())
//! # }
//! ```

use crate::cert_template::{
    CertTemplate, ExtKeyUsage, KeyUsageSet, Validity, ROOT_VALIDITY_YEARS,
};
use crate::chain_state::{CaKind, CaRecord, CertificateAuthority, RevocationUrls};
use crate::error::Result;
use crate::key_pair::{self, KeySpec};
use crate::path_len::MaxPathLen;
use crate::serial_allocator::{self, SerialSource};
use crate::signing::{self, Issuer};
use crate::subject::Subject;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Builder for a root CA key pair, self-signed certificate and CA record
///
/// # Defaults
/// - Key: ECDSA P-256
/// - Path length: unlimited
/// - Key usage: keyCertSign | cRLSign
/// - Extended key usage: none
/// - Validity: now .. now + 10 years
///
/// An empty CN is replaced by `<local-username>-<NN>` before signing.
pub struct RootCABuilder {
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

impl Default for RootCABuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RootCABuilder {
    /// Create a new root CA builder with default values
    pub fn new() -> Self {
        Self {
            subject: Subject::new(),
            key_spec: KeySpec::default(),
            not_before: None,
            not_after: None,
            validity_days: None,
            max_path_len: MaxPathLen::Unlimited,
            key_usage: KeyUsageSet::ca_default(),
            ext_key_usage: Vec::new(),
            urls: RevocationUrls::default(),
        }
    }

    /// Set the distinguished name of the root
    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }

    /// Set the key algorithm and size
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

    /// Set validity period in days, counted from `not_before`
    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = Some(days);
        self
    }

    /// Set the maximum number of CA levels beneath the root
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

    /// Set the OCSP, CA Issuers and CRL URLs the root advertises
    pub fn revocation_urls(mut self, urls: RevocationUrls) -> Self {
        self.urls = urls;
        self
    }

    /// Build the key pair, self-signed certificate and CA record
    ///
    /// The record is created with a random serial cursor and bound to
    /// `record_path`, but is not written; the caller commits it once it
    /// accepts the result.
    ///
    /// # Errors
    /// - [`crate::CaError::SigningError`] if key generation or signing fails
    /// - [`crate::CaError::InvalidAttribute`] for an inverted validity window
    pub fn build<S: SerialSource + ?Sized>(
        mut self,
        record_path: impl Into<PathBuf>,
        source: &mut S,
    ) -> Result<CertificateAuthority> {
        self.subject
            .ensure_common_name(None, &mut rand::thread_rng());

        let validity = Validity::from_request(
            self.not_before,
            self.not_after,
            self.validity_days,
            ROOT_VALIDITY_YEARS,
        )?;

        let key = key_pair::generate(&self.key_spec)?;
        let record = CaRecord::create(record_path, CaKind::Root, self.urls.clone(), source)?;
        let serial = serial_allocator::root_serial()?;

        let template = CertTemplate::ca(self.subject, validity, self.max_path_len, self.urls)
            .with_key_usage(self.key_usage)
            .with_ext_key_usage(self.ext_key_usage);
        let signed = signing::issue(&template, &serial, &key, Issuer::SelfSigned)?;

        tracing::info!(
            cn = template.subject.common_name(),
            path_len = %self.max_path_len,
            key = %self.key_spec,
            "root CA created"
        );

        Ok(CertificateAuthority {
            cert: signed.cert,
            key,
            fullchain: signed.fullchain,
            record,
        })
    }
}
