//! Output encodings for issued material.
//!
//! # Files Written Per Certificate
//! ```text
//! cert.pem / cert.cer            PEM certificate
//! fullchain.pem / fullchain.cer  PEM chain, leaf first, ending at the root
//! key.pem                        PKCS#8 key, "ENCRYPTED PRIVATE KEY" when a
//!                                passphrase is given, "PRIVATE KEY" otherwise
//! cert.spx                       certificate + fullchain + key, concatenated PEM
//! cert.pfx                       PKCS#12 with key, certificate and chain
//! ```
//!
//! Passphrases are restricted to `[A-Za-z0-9!@#$%^&*_]+` and handled as
//! [`SecretString`]; they are never logged.

use crate::error::{CaError, Result};
use crate::storage;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::stack::Stack;
use openssl::symm::Cipher;
use openssl::x509::{X509Ref, X509};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;
use std::sync::LazyLock;

pub const CERT_PEM: &str = "cert.pem";
pub const CERT_CER: &str = "cert.cer";
pub const FULLCHAIN_PEM: &str = "fullchain.pem";
pub const FULLCHAIN_CER: &str = "fullchain.cer";
pub const KEY_PEM: &str = "key.pem";
pub const BUNDLE_SPX: &str = "cert.spx";
pub const ARCHIVE_PFX: &str = "cert.pfx";

const ENCRYPTED_PEM_TAG: &str = "ENCRYPTED PRIVATE KEY";

const PASSPHRASE_PATTERN: &str = r"^[A-Za-z0-9!@#$%^&*_]+$";

static PASSPHRASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PASSPHRASE_PATTERN).expect("passphrase regex should compile"));

/// Validate a raw passphrase.
///
/// Surrounding whitespace is ignored. An empty passphrase means "no
/// encryption" and yields `None`.
pub fn parse_passphrase(raw: &str) -> Result<Option<SecretString>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !PASSPHRASE_RE.is_match(trimmed) {
        return Err(CaError::InvalidPassword);
    }
    Ok(Some(SecretString::from(trimmed.to_string())))
}

/// PKCS#8 PEM, AES-256-CBC encrypted when `passphrase` is set.
pub fn private_key_pem(
    key: &PKeyRef<Private>,
    passphrase: Option<&SecretString>,
) -> Result<Vec<u8>> {
    match passphrase {
        Some(pass) => key
            .private_key_to_pem_pkcs8_passphrase(
                Cipher::aes_256_cbc(),
                pass.expose_secret().as_bytes(),
            )
            .map_err(|e| CaError::signing("Failed to encrypt private key", e)),
        None => key
            .private_key_to_pem_pkcs8()
            .map_err(|e| CaError::signing("Failed to encode private key", e)),
    }
}

/// Read a key written by [`private_key_pem`].
pub fn load_private_key(pem: &[u8], passphrase: Option<&SecretString>) -> Result<PKey<Private>> {
    let encrypted = String::from_utf8_lossy(pem).contains(ENCRYPTED_PEM_TAG);
    match (encrypted, passphrase) {
        (true, Some(pass)) => {
            PKey::private_key_from_pem_passphrase(pem, pass.expose_secret().as_bytes())
                .map_err(|_| CaError::InvalidPassword)
        }
        (true, None) => Err(CaError::InvalidPassword),
        (false, _) => PKey::private_key_from_pem(pem)
            .map_err(|e| CaError::signing("Failed to decode private key", e)),
    }
}

/// Certificate, chain and key in one PEM stream.
pub fn bundle(cert_pem: &[u8], fullchain: &[u8], key_pem: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(cert_pem.len() + fullchain.len() + key_pem.len());
    out.extend_from_slice(cert_pem);
    out.extend_from_slice(fullchain);
    out.extend_from_slice(key_pem);
    out
}

/// Certificates of `fullchain` after the first one.
pub fn chain_certs(fullchain: &[u8]) -> Result<Vec<X509>> {
    let mut certs = X509::stack_from_pem(fullchain)
        .map_err(|e| CaError::signing("Failed to parse fullchain", e))?;
    if !certs.is_empty() {
        certs.remove(0);
    }
    Ok(certs)
}

/// PKCS#12 archive; an absent passphrase produces an archive with an empty
/// password.
pub fn pkcs12(
    friendly_name: &str,
    key: &PKeyRef<Private>,
    cert: &X509Ref,
    fullchain: &[u8],
    passphrase: Option<&SecretString>,
) -> Result<Vec<u8>> {
    let mut ca = Stack::new().map_err(|e| CaError::signing("Failed to create stack", e))?;
    for chain_cert in chain_certs(fullchain)? {
        ca.push(chain_cert)
            .map_err(|e| CaError::signing("Failed to add chain certificate", e))?;
    }

    let password = passphrase.map(|p| p.expose_secret()).unwrap_or("");
    let mut builder = Pkcs12::builder();
    builder.name(friendly_name).pkey(key).cert(cert).ca(ca);
    let archive = builder
        .build2(password)
        .map_err(|e| CaError::signing("Failed to build PKCS#12", e))?;
    archive
        .to_der()
        .map_err(|e| CaError::signing("Failed to encode PKCS#12", e))
}

/// Every output file for one certificate, encoded and ready to write.
pub struct Exports {
    cert_pem: Vec<u8>,
    fullchain: Vec<u8>,
    key_pem: Vec<u8>,
    bundle: Vec<u8>,
    pkcs12: Vec<u8>,
}

impl Exports {
    /// Encode all outputs up front; no file is touched.
    pub fn encode(
        friendly_name: &str,
        key: &PKeyRef<Private>,
        cert: &X509Ref,
        fullchain: &[u8],
        passphrase: Option<&SecretString>,
    ) -> Result<Self> {
        let cert_pem = cert
            .to_pem()
            .map_err(|e| CaError::signing("Failed to encode certificate", e))?;
        let key_pem = private_key_pem(key, passphrase)?;
        let pkcs12 = pkcs12(friendly_name, key, cert, fullchain, passphrase)?;
        Ok(Self {
            bundle: bundle(&cert_pem, fullchain, &key_pem),
            cert_pem,
            fullchain: fullchain.to_vec(),
            key_pem,
            pkcs12,
        })
    }

    /// File names and contents, in write order.
    pub fn files(&self) -> [(&'static str, &[u8]); 7] {
        [
            (CERT_PEM, self.cert_pem.as_slice()),
            (CERT_CER, self.cert_pem.as_slice()),
            (FULLCHAIN_PEM, self.fullchain.as_slice()),
            (FULLCHAIN_CER, self.fullchain.as_slice()),
            (KEY_PEM, self.key_pem.as_slice()),
            (BUNDLE_SPX, self.bundle.as_slice()),
            (ARCHIVE_PFX, self.pkcs12.as_slice()),
        ]
    }

    pub fn write_to(&self, dir: &Path) -> Result<()> {
        for (name, bytes) in self.files() {
            storage::write_atomic(&dir.join(name), bytes)?;
        }
        tracing::debug!(dir = %dir.display(), "certificate files exported");
        Ok(())
    }
}
