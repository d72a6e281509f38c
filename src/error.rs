//! Error types for the MyCA issuance engine.
//!
//! Every failure an issuance can hit maps onto one variant of [`CaError`].
//! Validation errors (subject, key spec, SAN, password) are recoverable:
//! the operator corrects the input and retries. Hierarchy, signing and
//! storage errors unwind the whole issuance without persisting CA state.

use thiserror::Error;

/// The main error type for certificate authority operations.
#[derive(Error, Debug)]
pub enum CaError {
    /// Unknown distinguished-name attribute
    #[error("Invalid subject attribute: {0}")]
    InvalidAttribute(String),

    /// Country code is not exactly two uppercase ASCII letters
    #[error("Invalid country code: {0}")]
    InvalidCountryCode(String),

    /// More than one value supplied for a single-valued attribute
    #[error("Too many values for attribute {0}")]
    TooManyValues(String),

    /// Algorithm/size combination not supported
    #[error("Unsupported key spec: {algorithm} {size}")]
    UnsupportedKeySpec { algorithm: String, size: u32 },

    /// Child CA would exceed what its issuer was granted
    #[error("Path length violation: {0}")]
    PathLenViolation(String),

    /// Cryptographic or encoding failure while building or signing
    #[error("Signing error: {0}")]
    SigningError(String),

    /// Persisted state is missing or cannot be decoded
    #[error("Corrupt CA state at {path}: {reason}")]
    CorruptState { path: String, reason: String },

    /// Storage I/O failure
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Private key passphrase contains characters outside the allowed set
    #[error("Invalid password: only letters, digits and !@#$%^&*_ are allowed")]
    InvalidPassword,

    /// Subject alternative name input rejected
    #[error("Invalid subject alternative name: {0}")]
    InvalidSan(String),

    /// Revocation or issuer URL rejected
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Named CA or certificate does not exist in the home directory
    #[error("Not found: {0}")]
    NotFound(String),
}

impl CaError {
    /// Whether the operator can fix the input and retry the same operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CaError::InvalidAttribute(_)
                | CaError::InvalidCountryCode(_)
                | CaError::TooManyValues(_)
                | CaError::UnsupportedKeySpec { .. }
                | CaError::InvalidPassword
                | CaError::InvalidSan(_)
                | CaError::InvalidUrl(_)
        )
    }

    pub(crate) fn signing(context: &str, err: impl std::fmt::Display) -> Self {
        CaError::SigningError(format!("{}: {}", context, err))
    }
}

/// A specialized Result type for MyCA operations.
pub type Result<T> = std::result::Result<T, CaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaError::UnsupportedKeySpec {
            algorithm: "RSA".to_string(),
            size: 3072,
        };
        assert_eq!(err.to_string(), "Unsupported key spec: RSA 3072");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CaError>();
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(CaError::InvalidCountryCode("usa".to_string()).is_recoverable());
        assert!(CaError::InvalidPassword.is_recoverable());
        assert!(!CaError::PathLenViolation("3 > 2".to_string()).is_recoverable());
        assert!(!CaError::SigningError("boom".to_string()).is_recoverable());
        assert!(!CaError::CorruptState {
            path: "ca-info.json".to_string(),
            reason: "missing".to_string(),
        }
        .is_recoverable());
    }

    #[test]
    fn test_signing_helper_formats_context() {
        let err = CaError::signing("Failed to sign certificate", "bad key");
        assert_eq!(
            err.to_string(),
            "Signing error: Failed to sign certificate: bad key"
        );
    }
}
