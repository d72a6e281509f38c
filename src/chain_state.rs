//! Persistent CA state.
//!
//! Every root or intermediate CA owns one [`CaRecord`]: the serial cursor it
//! allocates from and the revocation endpoints it advertises. Records are
//! created in memory, mutated on a clone during issuance, and only written
//! back by the storage layer once the certificate has been signed.
//!
//! Leaves get a separate [`CertRecord`] describing what was stamped into
//! them. It carries no cursor and cannot allocate serials.

use crate::error::{CaError, Result};
use crate::serial_allocator::{self, SerialSource};
use crate::storage;
use chrono::{DateTime, Utc};
use openssl::bn::{BigNum, BigNumRef};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Format version written into every record.
pub const RECORD_VERSION: u32 = 1;

/// Serial cursor stored as big-endian magnitude bytes, serialized as hex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialCursor(Vec<u8>);

impl SerialCursor {
    pub fn from_bignum(value: &BigNumRef) -> Self {
        SerialCursor(value.to_vec())
    }

    pub fn to_bignum(&self) -> Result<BigNum> {
        BigNum::from_slice(&self.0)
            .map_err(|e| CaError::signing("Failed to decode serial cursor", e))
    }

    /// Uppercase hex, `0` for zero.
    pub fn to_hex(&self) -> String {
        if self.0.is_empty() {
            "0".to_string()
        } else {
            hex::encode_upper(&self.0)
        }
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        let padded = if s.len() % 2 == 1 {
            format!("0{}", s)
        } else {
            s.to_string()
        };
        let mut bytes = hex::decode(&padded)
            .map_err(|e| CaError::signing("Invalid serial cursor hex", e))?;
        let leading = bytes.iter().take_while(|b| **b == 0).count();
        bytes.drain(..leading);
        Ok(SerialCursor(bytes))
    }
}

impl Serialize for SerialCursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SerialCursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SerialCursor::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// OCSP, CA Issuers and CRL distribution point URLs.
///
/// On a CA record these describe the CA itself. Leaves copy their
/// issuer's set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationUrls {
    #[serde(default)]
    pub ocsp: Vec<Url>,
    #[serde(default)]
    pub issuer: Vec<Url>,
    #[serde(default)]
    pub crl: Vec<Url>,
}

impl RevocationUrls {
    /// Parse the three URL lists. Every entry must be `http` or `https`.
    pub fn parse<S: AsRef<str>>(ocsp: &[S], issuer: &[S], crl: &[S]) -> Result<Self> {
        Ok(Self {
            ocsp: parse_http_urls(ocsp)?,
            issuer: parse_http_urls(issuer)?,
            crl: parse_http_urls(crl)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.ocsp.is_empty() && self.issuer.is_empty() && self.crl.is_empty()
    }
}

fn parse_http_urls<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Url>> {
    raw.iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            let url = Url::parse(s).map_err(|e| CaError::InvalidUrl(format!("{}: {}", s, e)))?;
            match url.scheme() {
                "http" | "https" => Ok(url),
                other => Err(CaError::InvalidUrl(format!(
                    "{}: scheme {} is not http or https",
                    s, other
                ))),
            }
        })
        .collect()
}

/// Which tier a CA record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaKind {
    Root,
    Intermediate,
}

/// Persisted state of one root or intermediate CA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaRecord {
    version: u32,
    kind: CaKind,
    serial_cursor: SerialCursor,
    #[serde(default)]
    urls: RevocationUrls,
    #[serde(skip)]
    path: PathBuf,
}

impl CaRecord {
    /// Fresh record with a random initial cursor in `[0, 2^40)`.
    ///
    /// Nothing is written until [`CaRecord::persist`] is called.
    pub fn create<S: SerialSource + ?Sized>(
        path: impl Into<PathBuf>,
        kind: CaKind,
        urls: RevocationUrls,
        source: &mut S,
    ) -> Result<Self> {
        let initial = serial_allocator::initial_cursor(source)?;
        Ok(Self {
            version: RECORD_VERSION,
            kind,
            serial_cursor: SerialCursor::from_bignum(&initial),
            urls,
            path: path.into(),
        })
    }

    /// Read a record previously written by [`CaRecord::persist`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut record: CaRecord = read_json(path)?;
        check_version(path, record.version)?;
        record.path = path.to_path_buf();
        Ok(record)
    }

    /// Atomically replace the record file.
    pub fn persist(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CaError::signing("Failed to encode CA record", e))?;
        storage::write_atomic(&self.path, &json)?;
        tracing::debug!(
            path = %self.path.display(),
            cursor = %self.serial_cursor.to_hex(),
            "CA record persisted"
        );
        Ok(())
    }

    pub fn kind(&self) -> CaKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn serial_cursor(&self) -> &SerialCursor {
        &self.serial_cursor
    }

    pub(crate) fn set_serial_cursor(&mut self, cursor: SerialCursor) {
        self.serial_cursor = cursor;
    }

    pub fn urls(&self) -> &RevocationUrls {
        &self.urls
    }

    pub fn ocsp_urls(&self) -> &[Url] {
        &self.urls.ocsp
    }

    pub fn issuer_urls(&self) -> &[Url] {
        &self.urls.issuer
    }

    pub fn crl_urls(&self) -> &[Url] {
        &self.urls.crl
    }
}

/// Record of a single leaf issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertRecord {
    version: u32,
    pub serial: String,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub self_signed: bool,
    #[serde(default)]
    pub urls: RevocationUrls,
    #[serde(skip)]
    path: PathBuf,
}

impl CertRecord {
    pub fn new(
        path: impl Into<PathBuf>,
        serial: String,
        issuer: String,
        self_signed: bool,
        urls: RevocationUrls,
    ) -> Self {
        Self {
            version: RECORD_VERSION,
            serial,
            issuer,
            issued_at: Utc::now(),
            self_signed,
            urls,
            path: path.into(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut record: CertRecord = read_json(path)?;
        check_version(path, record.version)?;
        record.path = path.to_path_buf();
        Ok(record)
    }

    pub fn persist(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CaError::signing("Failed to encode certificate record", e))?;
        storage::write_atomic(&self.path, &json)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let corrupt = |reason: String| CaError::CorruptState {
        path: path.display().to_string(),
        reason,
    };
    let bytes = fs::read(path).map_err(|e| corrupt(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))
}

fn check_version(path: &Path, version: u32) -> Result<()> {
    if version == RECORD_VERSION {
        return Ok(());
    }
    Err(CaError::CorruptState {
        path: path.display().to_string(),
        reason: format!("unsupported record version {}", version),
    })
}

/// A CA ready to sign: certificate, key, chain and state record.
#[derive(Debug)]
pub struct CertificateAuthority {
    pub cert: X509,
    pub key: PKey<Private>,
    pub fullchain: Vec<u8>,
    pub record: CaRecord,
}

impl CertificateAuthority {
    pub fn common_name(&self) -> String {
        self.cert
            .subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()
            .and_then(|e| e.data().as_utf8().ok())
            .map(|s| s.to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial_allocator::ScriptedSerialSource;
    use tempfile::TempDir;

    fn sample_urls() -> RevocationUrls {
        RevocationUrls::parse(
            &["https://ocsp.example.com"],
            &["http://ca.example.com/root.cer"],
            &["http://crl.example.com/root.crl"],
        )
        .unwrap()
    }

    #[test]
    fn test_serial_cursor_hex() {
        let cursor = SerialCursor::from_hex("0ABC").unwrap();
        assert_eq!(cursor.to_hex(), "0ABC");
        assert_eq!(SerialCursor::from_hex("abc").unwrap(), cursor);
        assert_eq!(SerialCursor::from_hex("0").unwrap().to_hex(), "0");
        assert!(SerialCursor::from_hex("xyz").is_err());
    }

    #[test]
    fn test_revocation_urls_reject_non_http() {
        let err = RevocationUrls::parse(&["ftp://ocsp.example.com"], &[], &[]).unwrap_err();
        assert!(matches!(err, CaError::InvalidUrl(_)));
        let err = RevocationUrls::parse(&["not a url"], &[], &[]).unwrap_err();
        assert!(matches!(err, CaError::InvalidUrl(_)));
    }

    #[test]
    fn test_revocation_urls_skip_blank() {
        let urls = RevocationUrls::parse(&["  ", "http://ocsp.example.com"], &[], &[]).unwrap();
        assert_eq!(urls.ocsp.len(), 1);
        assert!(!urls.is_empty());
        assert!(RevocationUrls::default().is_empty());
    }

    #[test]
    fn test_create_does_not_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ca-info.json");
        let mut source = ScriptedSerialSource::new([0x1234]);
        let record = CaRecord::create(&path, CaKind::Root, sample_urls(), &mut source).unwrap();

        assert!(!path.exists());
        assert_eq!(record.serial_cursor().to_hex(), "1234");
        assert_eq!(record.kind(), CaKind::Root);
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ca-info.json");
        let mut source = ScriptedSerialSource::new([99]);
        let record =
            CaRecord::create(&path, CaKind::Intermediate, sample_urls(), &mut source).unwrap();
        record.persist().unwrap();

        let loaded = CaRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.ocsp_urls()[0].as_str(), "https://ocsp.example.com/");
    }

    #[test]
    fn test_load_missing_is_corrupt_state() {
        let dir = TempDir::new().unwrap();
        let err = CaRecord::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, CaError::CorruptState { .. }));
    }

    #[test]
    fn test_load_garbage_is_corrupt_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ca-info.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            CaRecord::load(&path),
            Err(CaError::CorruptState { .. })
        ));
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ca-info.json");
        fs::write(
            &path,
            br#"{"version":9,"kind":"root","serial_cursor":"01"}"#,
        )
        .unwrap();
        assert!(matches!(
            CaRecord::load(&path),
            Err(CaError::CorruptState { .. })
        ));
    }

    #[test]
    fn test_cert_record_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cert-info.json");
        let record = CertRecord::new(
            &path,
            "1F".to_string(),
            "CN=Root1".to_string(),
            false,
            sample_urls(),
        );
        record.persist().unwrap();
        assert_eq!(CertRecord::load(&path).unwrap(), record);
    }

    #[test]
    fn test_cert_record_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cert-info.json");
        CertRecord::new(&path, "1F".to_string(), "CN=Root1".to_string(), true, sample_urls())
            .persist()
            .unwrap();
        let json = fs::read_to_string(&path).unwrap();
        assert!(json.contains(r#""version": 1"#));
        fs::write(&path, json.replace(r#""version": 1"#, r#""version": 99"#)).unwrap();

        assert!(matches!(
            CertRecord::load(&path),
            Err(CaError::CorruptState { .. })
        ));
    }

    #[test]
    fn test_persist_into_missing_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();

        let mut source = ScriptedSerialSource::new([7]);
        let record = CaRecord::create(
            blocker.join("ca-info.json"),
            CaKind::Root,
            RevocationUrls::default(),
            &mut source,
        )
        .unwrap();
        assert!(matches!(record.persist(), Err(CaError::IoError(_))));
        assert_eq!(fs::read(&blocker).unwrap(), b"");
    }
}
