//! Path-length constraint checks for subordinate CA issuance.
//!
//! A CA's `pathLenConstraint` bounds how many CA levels may exist beneath
//! it. A child CA is refused at issuance time whenever its requested bound
//! would exceed what its issuer was granted.

use crate::error::{CaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel used on the command line and in requests for "no constraint".
pub const UNLIMITED_SENTINEL: i32 = -1;

/// Maximum path length of a CA certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxPathLen {
    /// No `pathLenConstraint` in BasicConstraints
    Unlimited,
    /// `pathLenConstraint` present; `0` forbids signing further CAs
    Limited(u8),
}

impl MaxPathLen {
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            UNLIMITED_SENTINEL => Ok(MaxPathLen::Unlimited),
            0..=255 => Ok(MaxPathLen::Limited(value as u8)),
            _ => Err(CaError::PathLenViolation(format!(
                "path length must be -1 or in 0..=255, got {}",
                value
            ))),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            MaxPathLen::Unlimited => UNLIMITED_SENTINEL,
            MaxPathLen::Limited(n) => n as i32,
        }
    }

    /// Value for the BasicConstraints extension, `None` when unlimited.
    pub fn constraint(self) -> Option<u32> {
        match self {
            MaxPathLen::Unlimited => None,
            MaxPathLen::Limited(n) => Some(n as u32),
        }
    }
}

impl fmt::Display for MaxPathLen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxPathLen::Unlimited => write!(f, "unlimited"),
            MaxPathLen::Limited(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for MaxPathLen {
    type Err = CaError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(MaxPathLen::Unlimited);
        }
        let value: i32 = s
            .parse()
            .map_err(|_| CaError::PathLenViolation(format!("not a path length: {}", s)))?;
        Self::from_i32(value)
    }
}

/// Check a child CA request against its issuer's own path length.
///
/// * unlimited child: only under an unlimited parent
/// * `0` child: refused when the parent is itself `0`
/// * `n > 0` child: refused when the parent is limited below `n`
///
/// A parent limited to `0` may not sign any CA, so the last two rules
/// together refuse every child CA request below it.
pub fn check_child(parent: MaxPathLen, requested: MaxPathLen) -> Result<()> {
    use MaxPathLen::*;

    let violation = match (parent, requested) {
        (Unlimited, _) => None,
        (Limited(p), Unlimited) => Some(format!(
            "unlimited path length requested under an issuer limited to {}",
            p
        )),
        (Limited(0), Limited(_)) => {
            Some("issuer path length is 0, it may not sign CA certificates".to_string())
        }
        (Limited(p), Limited(n)) if p < n => Some(format!(
            "requested path length {} exceeds issuer path length {}",
            n, p
        )),
        (Limited(_), Limited(_)) => None,
    };

    match violation {
        Some(reason) => {
            tracing::warn!(parent = %parent, requested = %requested, "path length rejected");
            Err(CaError::PathLenViolation(reason))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MaxPathLen::*;

    #[test]
    fn test_from_i32() {
        assert_eq!(MaxPathLen::from_i32(-1).unwrap(), Unlimited);
        assert_eq!(MaxPathLen::from_i32(0).unwrap(), Limited(0));
        assert_eq!(MaxPathLen::from_i32(7).unwrap(), Limited(7));
        assert!(MaxPathLen::from_i32(-2).is_err());
        assert!(MaxPathLen::from_i32(256).is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!("unlimited".parse::<MaxPathLen>().unwrap(), Unlimited);
        assert_eq!("-1".parse::<MaxPathLen>().unwrap(), Unlimited);
        assert_eq!(" 3 ".parse::<MaxPathLen>().unwrap(), Limited(3));
        assert!("three".parse::<MaxPathLen>().is_err());
    }

    #[test]
    fn test_constraint_encoding() {
        assert_eq!(Unlimited.constraint(), None);
        assert_eq!(Limited(0).constraint(), Some(0));
        assert_eq!(Limited(2).as_i32(), 2);
        assert_eq!(Unlimited.as_i32(), -1);
    }

    #[test]
    fn test_unlimited_parent_allows_everything() {
        for child in [Unlimited, Limited(0), Limited(200)] {
            assert!(check_child(Unlimited, child).is_ok());
        }
    }

    #[test]
    fn test_unlimited_child_needs_unlimited_parent() {
        let err = check_child(Limited(5), Unlimited).unwrap_err();
        assert!(matches!(err, CaError::PathLenViolation(_)));
    }

    #[test]
    fn test_zero_parent_rejects_all_children() {
        for child in [Unlimited, Limited(0), Limited(1)] {
            assert!(matches!(
                check_child(Limited(0), child),
                Err(CaError::PathLenViolation(_))
            ));
        }
    }

    #[test]
    fn test_limited_parent() {
        assert!(check_child(Limited(2), Limited(0)).is_ok());
        assert!(check_child(Limited(2), Limited(1)).is_ok());
        assert!(check_child(Limited(2), Limited(2)).is_ok());
        assert!(matches!(
            check_child(Limited(2), Limited(3)),
            Err(CaError::PathLenViolation(_))
        ));
    }
}
