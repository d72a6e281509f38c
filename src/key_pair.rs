//! Key pair generation.
//!
//! # Supported Key Specs
//! ```text
//! RSA          2048, 4096
//! ECDSA / ECC  256 (P-256), 384 (P-384), 521 (P-521)
//! ```
//!
//! Any other combination is rejected with [`CaError::UnsupportedKeySpec`]
//! before any key material is produced. Each call returns a new key; keys
//! are never shared between certificates.

use crate::error::{CaError, Result};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use std::fmt;
use std::str::FromStr;

/// Public key algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
}

impl FromStr for KeyAlgorithm {
    type Err = CaError;

    /// `RSA`, `ECDSA` or its synonym `ECC`, any case.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RSA" => Ok(KeyAlgorithm::Rsa),
            "ECDSA" | "ECC" => Ok(KeyAlgorithm::Ecdsa),
            other => Err(CaError::UnsupportedKeySpec {
                algorithm: other.to_string(),
                size: 0,
            }),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa => write!(f, "RSA"),
            KeyAlgorithm::Ecdsa => write!(f, "ECDSA"),
        }
    }
}

/// A validated algorithm/size pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    algorithm: KeyAlgorithm,
    size: u32,
}

impl KeySpec {
    pub fn new(algorithm: KeyAlgorithm, size: u32) -> Result<Self> {
        let supported = match algorithm {
            KeyAlgorithm::Rsa => matches!(size, 2048 | 4096),
            KeyAlgorithm::Ecdsa => matches!(size, 256 | 384 | 521),
        };
        if !supported {
            return Err(CaError::UnsupportedKeySpec {
                algorithm: algorithm.to_string(),
                size,
            });
        }
        Ok(Self { algorithm, size })
    }

    /// Parse an algorithm name and size as given on the command line.
    pub fn parse(algorithm: &str, size: u32) -> Result<Self> {
        let algorithm = algorithm.parse::<KeyAlgorithm>().map_err(|_| {
            CaError::UnsupportedKeySpec {
                algorithm: algorithm.trim().to_string(),
                size,
            }
        })?;
        Self::new(algorithm, size)
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    fn curve(&self) -> Option<Nid> {
        match (self.algorithm, self.size) {
            (KeyAlgorithm::Ecdsa, 256) => Some(Nid::X9_62_PRIME256V1),
            (KeyAlgorithm::Ecdsa, 384) => Some(Nid::SECP384R1),
            (KeyAlgorithm::Ecdsa, 521) => Some(Nid::SECP521R1),
            _ => None,
        }
    }
}

impl Default for KeySpec {
    fn default() -> Self {
        Self {
            algorithm: KeyAlgorithm::Ecdsa,
            size: 256,
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.size)
    }
}

/// Generate a fresh private key for `spec`.
pub fn generate(spec: &KeySpec) -> Result<PKey<Private>> {
    let key = match spec.algorithm {
        KeyAlgorithm::Rsa => {
            let rsa = Rsa::generate(spec.size)
                .map_err(|e| CaError::signing("Failed to generate RSA key", e))?;
            PKey::from_rsa(rsa).map_err(|e| CaError::signing("Failed to wrap RSA key", e))?
        }
        KeyAlgorithm::Ecdsa => {
            let nid = spec.curve().ok_or_else(|| CaError::UnsupportedKeySpec {
                algorithm: spec.algorithm.to_string(),
                size: spec.size,
            })?;
            let group = EcGroup::from_curve_name(nid)
                .map_err(|e| CaError::signing("Failed to load EC curve", e))?;
            let ec = EcKey::generate(&group)
                .map_err(|e| CaError::signing("Failed to generate EC key", e))?;
            PKey::from_ec_key(ec).map_err(|e| CaError::signing("Failed to wrap EC key", e))?
        }
    };

    tracing::debug!(algorithm = %spec.algorithm, size = spec.size, "key pair generated");
    Ok(key)
}

/// Digest used when `key` signs: SHA-256 for RSA and P-256, SHA-384 for
/// P-384, SHA-512 for P-521.
pub fn signature_digest(key: &PKeyRef<Private>) -> MessageDigest {
    match (key.id(), key.bits()) {
        (Id::EC, 384) => MessageDigest::sha384(),
        (Id::EC, 521) => MessageDigest::sha512(),
        _ => MessageDigest::sha256(),
    }
}
