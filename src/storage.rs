//! CA home directory layout.
//!
//! ```text
//! <home>/
//!   rca/<name>/   root CAs          ca-info.json + exported files
//!   ica/<name>/   intermediate CAs  ca-info.json + exported files
//!   cert/<name>/  leaves            cert-info.json + exported files
//! ```
//!
//! Issuance never writes. [`CaHome::commit_ca`] and [`CaHome::commit_leaf`]
//! encode every output file first, then persist the issuer's advanced
//! record, then write the exported files, then the new record. An encoding
//! failure or a failure to persist the issuer's record leaves nothing
//! written.

use crate::chain_state::{CaRecord, CertificateAuthority};
use crate::error::{CaError, Result};
use crate::export::{self, Exports};
use crate::generate_user_keypair::IssuedCert;
use crate::subject::Subject;
use openssl::x509::X509;
use secrecy::SecretString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const CA_RECORD_FILE: &str = "ca-info.json";
pub const CERT_RECORD_FILE: &str = "cert-info.json";

const INVALID_NAME_CHARS: &[char] = &[
    ' ', '\t', '@', '#', '$', '￥', '&', '(', ')', '|', '\\', '/', ':', '*', '?', '"', '<', '>',
];
const FALLBACK_DIR_NAME: &str = "unnamed";

/// Directory tier under the CA home.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Rca,
    Ica,
    Cert,
}

impl Tier {
    pub fn dir_name(self) -> &'static str {
        match self {
            Tier::Rca => "rca",
            Tier::Ica => "ica",
            Tier::Cert => "cert",
        }
    }

    fn record_file(self) -> &'static str {
        match self {
            Tier::Rca | Tier::Ica => CA_RECORD_FILE,
            Tier::Cert => CERT_RECORD_FILE,
        }
    }
}

/// Strip characters that are unsafe in directory names and trailing dots.
pub fn sanitize_dir_name(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !INVALID_NAME_CHARS.contains(c)).collect();
    cleaned.trim_end_matches('.').to_string()
}

/// Default directory name for a subject: its items joined with `-`, falling
/// back to the CN.
pub fn default_dir_name(subject: &Subject) -> String {
    let joined = subject
        .items()
        .iter()
        .map(|item| sanitize_dir_name(item))
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if !joined.is_empty() {
        return joined;
    }
    let cn = sanitize_dir_name(subject.common_name());
    if cn.is_empty() {
        FALLBACK_DIR_NAME.to_string()
    } else {
        cn
    }
}

/// Replace `path` atomically with `bytes`.
///
/// The temporary file is created next to the target with mode 0600.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CaError::IoError(e.error))?;
    Ok(())
}

fn read_state(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| CaError::CorruptState {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Root of a CA home directory.
#[derive(Debug, Clone)]
pub struct CaHome {
    root: PathBuf,
}

impl CaHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.root.join(tier.dir_name())
    }

    pub fn entry_dir(&self, tier: Tier, name: &str) -> PathBuf {
        self.tier_dir(tier).join(name)
    }

    /// Pick an unused directory for new material.
    ///
    /// Uses `preferred` when given, else [`default_dir_name`]; appends `-2`,
    /// `-3`, ... when the name is taken. Nothing is created on disk.
    pub fn allocate_dir(&self, tier: Tier, preferred: Option<&str>, subject: &Subject) -> PathBuf {
        let base = preferred
            .map(sanitize_dir_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default_dir_name(subject));
        let mut candidate = self.entry_dir(tier, &base);
        let mut n = 2;
        while candidate.exists() {
            candidate = self.entry_dir(tier, &format!("{}-{}", base, n));
            n += 1;
        }
        candidate
    }

    /// Path of the state record for new material in `dir`.
    pub fn record_path(dir: &Path, tier: Tier) -> PathBuf {
        dir.join(tier.record_file())
    }

    /// Names of entries in `tier` that hold a state record, sorted.
    pub fn list(&self, tier: Tier) -> Result<Vec<String>> {
        let dir = self.tier_dir(tier);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().join(tier.record_file()).is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn list_rca(&self) -> Result<Vec<String>> {
        self.list(Tier::Rca)
    }

    pub fn list_ica(&self) -> Result<Vec<String>> {
        self.list(Tier::Ica)
    }

    /// Load a root or intermediate CA for signing.
    ///
    /// `passphrase` is required when `key.pem` is encrypted.
    pub fn load_ca(
        &self,
        tier: Tier,
        name: &str,
        passphrase: Option<&SecretString>,
    ) -> Result<CertificateAuthority> {
        if tier == Tier::Cert {
            return Err(CaError::NotFound(format!("{} is not a CA tier", tier.dir_name())));
        }
        let dir = self.entry_dir(tier, name);
        if !dir.join(CA_RECORD_FILE).is_file() {
            return Err(CaError::NotFound(format!("{}/{}", tier.dir_name(), name)));
        }

        let cert_path = dir.join(export::CERT_PEM);
        let cert = X509::from_pem(&read_state(&cert_path)?).map_err(|e| CaError::CorruptState {
            path: cert_path.display().to_string(),
            reason: e.to_string(),
        })?;
        let key = export::load_private_key(&read_state(&dir.join(export::KEY_PEM))?, passphrase)?;
        let fullchain = read_state(&dir.join(export::FULLCHAIN_PEM))?;
        let record = CaRecord::load(dir.join(CA_RECORD_FILE))?;

        let matches = cert
            .public_key()
            .map(|public| public.public_eq(&key))
            .unwrap_or(false);
        if !matches {
            return Err(CaError::CorruptState {
                path: dir.display().to_string(),
                reason: "private key does not match certificate".to_string(),
            });
        }

        tracing::debug!(dir = %dir.display(), "CA loaded");
        Ok(CertificateAuthority {
            cert,
            key,
            fullchain,
            record,
        })
    }

    /// Persist a newly issued CA and, for intermediates, the parent's
    /// advanced record.
    pub fn commit_ca(
        &self,
        ca: &CertificateAuthority,
        parent_record: Option<&CaRecord>,
        passphrase: Option<&SecretString>,
    ) -> Result<()> {
        let exports = Exports::encode(
            &ca.common_name(),
            &ca.key,
            &ca.cert,
            &ca.fullchain,
            passphrase,
        );
        let dir = self.commit(exports, ca.record.path(), parent_record, || ca.record.persist())?;
        tracing::info!(dir = %dir.display(), "CA committed");
        Ok(())
    }

    /// Persist a newly issued leaf and, when CA-signed, the issuer's
    /// advanced record.
    pub fn commit_leaf(
        &self,
        leaf: &IssuedCert,
        issuer_record: Option<&CaRecord>,
        passphrase: Option<&SecretString>,
    ) -> Result<()> {
        let dir = parent_dir(leaf.record.path())?;
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let exports = Exports::encode(&name, &leaf.key, &leaf.cert, &leaf.fullchain, passphrase);
        self.commit(exports, leaf.record.path(), issuer_record, || leaf.record.persist())?;
        tracing::info!(dir = %dir.display(), "certificate committed");
        Ok(())
    }

    /// Shared commit sequence.
    ///
    /// Encoding and directory creation happen before anything is persisted,
    /// so their failures leave the issuer's record untouched. The new record
    /// is written last; [`CaHome::list`] only reports entries that have one.
    fn commit(
        &self,
        exports: Result<Exports>,
        record_path: &Path,
        issuer_record: Option<&CaRecord>,
        persist_record: impl FnOnce() -> Result<()>,
    ) -> Result<PathBuf> {
        let exports = exports?;
        let dir = parent_dir(record_path)?;
        fs::create_dir_all(&dir)?;

        if let Some(issuer) = issuer_record {
            issuer.persist()?;
        }
        exports.write_to(&dir)?;
        persist_record()?;
        Ok(dir)
    }
}

fn parent_dir(record_path: &Path) -> Result<PathBuf> {
    record_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .ok_or_else(|| CaError::NotFound(format!("no directory for {}", record_path.display())))
}
