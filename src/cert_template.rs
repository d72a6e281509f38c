//! Certificate Template Module
//!
//! A [`CertTemplate`] is everything needed to sign one certificate except the
//! keys and the serial: subject, validity window, key usage, extended key
//! usage, CA flags or SAN entries, and the revocation URLs to advertise.
//!
//! # Template Kinds
//! ```text
//! CA template    BasicConstraints CA=true, optional pathlen
//!                URLs describe the CA itself
//! Leaf template  BasicConstraints CA=false, SAN from validated input
//!                URLs are copied from the issuing CA
//! ```
//!
//! # Defaults
//! - **Validity**: starts now; ends after 10 years for roots and 5 years
//!   for everything else
//! - **Key Usage**: keyCertSign + cRLSign for CAs, digitalSignature +
//!   keyEncipherment for leaves
//! - **Extended Key Usage**: none. An empty set means the extension is
//!   omitted, not that "any" usage is asserted

use crate::chain_state::RevocationUrls;
use crate::error::{CaError, Result};
use crate::path_len::MaxPathLen;
use crate::subject::Subject;
use chrono::{DateTime, Duration, Utc};
use openssl::x509::extension::{ExtendedKeyUsage, KeyUsage};
use openssl::x509::X509Extension;
use regex::Regex;
use std::fmt;
use std::net::IpAddr;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;
use std::sync::LazyLock;
use url::Url;

const DAYS_PER_YEAR: i64 = 365;
pub const ROOT_VALIDITY_YEARS: i64 = 10;
pub const DEFAULT_VALIDITY_YEARS: i64 = 5;

// ================= Subject Alternative Names =================

/// Validated SAN entries for a leaf certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectAltNames {
    pub domains: Vec<String>,
    pub ips: Vec<IpAddr>,
    pub emails: Vec<String>,
    pub uris: Vec<Url>,
}

const DOMAIN_PATTERN: &str = concat!(
    r"^(\*\.)?([A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)*",
    r"[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$",
);
const EMAIL_LOCAL_PATTERN: &str = r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+$";

static DOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DOMAIN_PATTERN).expect("domain regex should compile"));
static EMAIL_LOCAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(EMAIL_LOCAL_PATTERN).expect("email local-part regex should compile")
});

fn is_domain(value: &str) -> bool {
    value.len() <= 253 && DOMAIN_RE.is_match(value)
}

impl SubjectAltNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a DNS name. A single leading `*.` wildcard label is allowed.
    pub fn add_domain(&mut self, domain: &str) -> Result<()> {
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        if !is_domain(&domain) {
            return Err(CaError::InvalidSan(format!("invalid domain: {}", domain)));
        }
        self.domains.push(domain);
        Ok(())
    }

    pub fn add_ip(&mut self, ip: &str) -> Result<()> {
        let parsed = ip
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| CaError::InvalidSan(format!("invalid IP address: {}", ip.trim())))?;
        self.ips.push(parsed);
        Ok(())
    }

    pub fn add_email(&mut self, email: &str) -> Result<()> {
        let email = email.trim();
        let valid = match email.rsplit_once('@') {
            Some((local, domain)) => {
                EMAIL_LOCAL_RE.is_match(local)
                    && !domain.starts_with("*.")
                    && is_domain(domain)
            }
            None => false,
        };
        if !valid {
            return Err(CaError::InvalidSan(format!("invalid email: {}", email)));
        }
        self.emails.push(email.to_string());
        Ok(())
    }

    pub fn add_uri(&mut self, uri: &str) -> Result<()> {
        let parsed = Url::parse(uri.trim())
            .map_err(|e| CaError::InvalidSan(format!("invalid URI {}: {}", uri.trim(), e)))?;
        self.uris.push(parsed);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
            && self.ips.is_empty()
            && self.emails.is_empty()
            && self.uris.is_empty()
    }
}

// ================= Key Usage =================

/// Bitmask of X.509 key usages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KeyUsageSet(u16);

impl KeyUsageSet {
    pub const DIGITAL_SIGNATURE: Self = Self(1 << 0);
    pub const CONTENT_COMMITMENT: Self = Self(1 << 1);
    pub const KEY_ENCIPHERMENT: Self = Self(1 << 2);
    pub const DATA_ENCIPHERMENT: Self = Self(1 << 3);
    pub const KEY_AGREEMENT: Self = Self(1 << 4);
    pub const CERT_SIGN: Self = Self(1 << 5);
    pub const CRL_SIGN: Self = Self(1 << 6);

    const NAMES: [(&'static str, KeyUsageSet); 7] = [
        ("digital-signature", Self::DIGITAL_SIGNATURE),
        ("content-commitment", Self::CONTENT_COMMITMENT),
        ("key-encipherment", Self::KEY_ENCIPHERMENT),
        ("data-encipherment", Self::DATA_ENCIPHERMENT),
        ("key-agreement", Self::KEY_AGREEMENT),
        ("cert-sign", Self::CERT_SIGN),
        ("crl-sign", Self::CRL_SIGN),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn ca_default() -> Self {
        Self::CERT_SIGN | Self::CRL_SIGN
    }

    pub fn leaf_default() -> Self {
        Self::DIGITAL_SIGNATURE | Self::KEY_ENCIPHERMENT
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Critical KeyUsage extension, `None` for an empty set.
    pub fn to_extension(self) -> Result<Option<X509Extension>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut usage = KeyUsage::new();
        usage.critical();
        if self.contains(Self::DIGITAL_SIGNATURE) {
            usage.digital_signature();
        }
        if self.contains(Self::CONTENT_COMMITMENT) {
            usage.non_repudiation();
        }
        if self.contains(Self::KEY_ENCIPHERMENT) {
            usage.key_encipherment();
        }
        if self.contains(Self::DATA_ENCIPHERMENT) {
            usage.data_encipherment();
        }
        if self.contains(Self::KEY_AGREEMENT) {
            usage.key_agreement();
        }
        if self.contains(Self::CERT_SIGN) {
            usage.key_cert_sign();
        }
        if self.contains(Self::CRL_SIGN) {
            usage.crl_sign();
        }
        usage
            .build()
            .map(Some)
            .map_err(|e| CaError::signing("Failed to build key usage", e))
    }
}

impl BitOr for KeyUsageSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for KeyUsageSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromStr for KeyUsageSet {
    type Err = CaError;

    /// Comma separated usage names, e.g. `digital-signature,key-encipherment`.
    fn from_str(s: &str) -> Result<Self> {
        let mut set = Self::empty();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let normalized = name.to_ascii_lowercase().replace('_', "-");
            let (_, usage) = Self::NAMES
                .iter()
                .find(|(n, _)| *n == normalized)
                .ok_or_else(|| CaError::InvalidAttribute(format!("unknown key usage: {}", name)))?;
            set |= *usage;
        }
        Ok(set)
    }
}

impl fmt::Display for KeyUsageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, u)| self.contains(*u))
            .map(|(n, _)| *n)
            .collect();
        write!(f, "{}", names.join(","))
    }
}

// ================= Extended Key Usage =================

/// Extended key usages a certificate may assert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtKeyUsage {
    Any,
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    IpsecEndSystem,
    IpsecTunnel,
    IpsecUser,
    TimeStamping,
    OcspSigning,
    MicrosoftServerGatedCrypto,
    NetscapeServerGatedCrypto,
    MicrosoftCommercialCodeSigning,
    MicrosoftKernelCodeSigning,
}

impl ExtKeyUsage {
    pub const ALL: [ExtKeyUsage; 14] = [
        ExtKeyUsage::Any,
        ExtKeyUsage::ServerAuth,
        ExtKeyUsage::ClientAuth,
        ExtKeyUsage::CodeSigning,
        ExtKeyUsage::EmailProtection,
        ExtKeyUsage::IpsecEndSystem,
        ExtKeyUsage::IpsecTunnel,
        ExtKeyUsage::IpsecUser,
        ExtKeyUsage::TimeStamping,
        ExtKeyUsage::OcspSigning,
        ExtKeyUsage::MicrosoftServerGatedCrypto,
        ExtKeyUsage::NetscapeServerGatedCrypto,
        ExtKeyUsage::MicrosoftCommercialCodeSigning,
        ExtKeyUsage::MicrosoftKernelCodeSigning,
    ];

    pub fn oid(self) -> &'static str {
        match self {
            ExtKeyUsage::Any => "2.5.29.37.0",
            ExtKeyUsage::ServerAuth => "1.3.6.1.5.5.7.3.1",
            ExtKeyUsage::ClientAuth => "1.3.6.1.5.5.7.3.2",
            ExtKeyUsage::CodeSigning => "1.3.6.1.5.5.7.3.3",
            ExtKeyUsage::EmailProtection => "1.3.6.1.5.5.7.3.4",
            ExtKeyUsage::IpsecEndSystem => "1.3.6.1.5.5.7.3.5",
            ExtKeyUsage::IpsecTunnel => "1.3.6.1.5.5.7.3.6",
            ExtKeyUsage::IpsecUser => "1.3.6.1.5.5.7.3.7",
            ExtKeyUsage::TimeStamping => "1.3.6.1.5.5.7.3.8",
            ExtKeyUsage::OcspSigning => "1.3.6.1.5.5.7.3.9",
            ExtKeyUsage::MicrosoftServerGatedCrypto => "1.3.6.1.4.1.311.10.3.3",
            ExtKeyUsage::NetscapeServerGatedCrypto => "2.16.840.1.113730.4.1",
            ExtKeyUsage::MicrosoftCommercialCodeSigning => "1.3.6.1.4.1.311.2.1.22",
            ExtKeyUsage::MicrosoftKernelCodeSigning => "1.3.6.1.4.1.311.61.1.1",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExtKeyUsage::Any => "any",
            ExtKeyUsage::ServerAuth => "server-auth",
            ExtKeyUsage::ClientAuth => "client-auth",
            ExtKeyUsage::CodeSigning => "code-signing",
            ExtKeyUsage::EmailProtection => "email-protection",
            ExtKeyUsage::IpsecEndSystem => "ipsec-end-system",
            ExtKeyUsage::IpsecTunnel => "ipsec-tunnel",
            ExtKeyUsage::IpsecUser => "ipsec-user",
            ExtKeyUsage::TimeStamping => "time-stamping",
            ExtKeyUsage::OcspSigning => "ocsp-signing",
            ExtKeyUsage::MicrosoftServerGatedCrypto => "microsoft-server-gated-crypto",
            ExtKeyUsage::NetscapeServerGatedCrypto => "netscape-server-gated-crypto",
            ExtKeyUsage::MicrosoftCommercialCodeSigning => "microsoft-commercial-code-signing",
            ExtKeyUsage::MicrosoftKernelCodeSigning => "microsoft-kernel-code-signing",
        }
    }

    pub fn from_oid(oid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|u| u.oid() == oid)
    }

    /// Non-critical EKU extension, `None` for an empty list.
    pub fn to_extension(usages: &[ExtKeyUsage]) -> Result<Option<X509Extension>> {
        if usages.is_empty() {
            return Ok(None);
        }
        let mut eku = ExtendedKeyUsage::new();
        for usage in usages {
            eku.other(usage.oid());
        }
        eku.build()
            .map(Some)
            .map_err(|e| CaError::signing("Failed to build extended key usage", e))
    }
}

impl FromStr for ExtKeyUsage {
    type Err = CaError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|u| u.name() == normalized)
            .ok_or_else(|| CaError::InvalidAttribute(format!("unknown extended key usage: {}", s)))
    }
}

impl fmt::Display for ExtKeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ================= Validity =================

/// Certificate validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl Validity {
    /// Fill unset bounds: `not_before` defaults to now, `not_after` to
    /// `not_before` plus `default_years` 365-day years.
    pub fn resolve(
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
        default_years: i64,
    ) -> Result<Self> {
        let not_before = not_before.unwrap_or_else(Utc::now);
        let not_after =
            not_after.unwrap_or_else(|| not_before + Duration::days(DAYS_PER_YEAR * default_years));
        if not_after <= not_before {
            return Err(CaError::InvalidAttribute(format!(
                "validity ends ({}) before it starts ({})",
                not_after, not_before
            )));
        }
        Ok(Self {
            not_before,
            not_after,
        })
    }

    /// Resolve builder input: an explicit `not_after` wins over `days`,
    /// which wins over `default_years`.
    pub fn from_request(
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
        days: Option<u32>,
        default_years: i64,
    ) -> Result<Self> {
        let start = not_before.unwrap_or_else(Utc::now);
        let end = not_after.or_else(|| days.map(|d| start + Duration::days(d as i64)));
        Self::resolve(Some(start), end, default_years)
    }

    /// Window starting now and lasting `days`.
    pub fn for_days(days: u32) -> Result<Self> {
        let now = Utc::now();
        Self::resolve(Some(now), Some(now + Duration::days(days as i64)), 0)
    }
}

// ================= Template =================

/// What kind of certificate the template describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateKind {
    Ca { max_path_len: MaxPathLen },
    Leaf { san: SubjectAltNames },
}

/// Everything needed to sign a certificate except keys and serial.
#[derive(Debug, Clone)]
pub struct CertTemplate {
    pub subject: Subject,
    pub validity: Validity,
    pub key_usage: KeyUsageSet,
    pub ext_key_usage: Vec<ExtKeyUsage>,
    pub kind: TemplateKind,
    pub urls: RevocationUrls,
}

impl CertTemplate {
    /// CA template with CA key usage defaults and its own URLs.
    pub fn ca(
        subject: Subject,
        validity: Validity,
        max_path_len: MaxPathLen,
        urls: RevocationUrls,
    ) -> Self {
        Self {
            subject,
            validity,
            key_usage: KeyUsageSet::ca_default(),
            ext_key_usage: Vec::new(),
            kind: TemplateKind::Ca { max_path_len },
            urls,
        }
    }

    /// Leaf template with leaf key usage defaults and the issuer's URLs.
    pub fn leaf(
        subject: Subject,
        validity: Validity,
        san: SubjectAltNames,
        issuer_urls: RevocationUrls,
    ) -> Self {
        Self {
            subject,
            validity,
            key_usage: KeyUsageSet::leaf_default(),
            ext_key_usage: Vec::new(),
            kind: TemplateKind::Leaf { san },
            urls: issuer_urls,
        }
    }

    pub fn with_key_usage(mut self, key_usage: KeyUsageSet) -> Self {
        self.key_usage = key_usage;
        self
    }

    pub fn with_ext_key_usage(mut self, ext_key_usage: Vec<ExtKeyUsage>) -> Self {
        self.ext_key_usage = ext_key_usage;
        self
    }

    pub fn is_ca(&self) -> bool {
        matches!(self.kind, TemplateKind::Ca { .. })
    }
}
