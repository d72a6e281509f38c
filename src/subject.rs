//! Subject Distinguished Name Module
//!
//! Normalizes operator-supplied distinguished-name attributes into a canonical
//! [`Subject`] that can be stamped into any certificate tier.
//!
//! # Attributes
//! ```text
//! C       country (exactly two uppercase ASCII letters, multi-valued)
//! ST      state or province                        (multi-valued)
//! L       locality                                 (multi-valued)
//! O       organization                             (multi-valued)
//! OU      organizational unit                      (multi-valued)
//! STREET  street address   (alias SA)              (multi-valued)
//! POSTAL  postal code      (alias PC, POSTALCODE)  (multi-valued)
//! CN      common name                              (single-valued)
//! ```
//!
//! Every successful [`Subject::set`] remembers the first non-empty value in an
//! ordered list of "subject items", used later to derive default directory
//! names for the issued material.
//!
//! # Common Name Fallback
//! A certificate is never issued with an empty CN. [`Subject::ensure_common_name`]
//! fills it from the first SAN entry when hints are given, or from the local
//! user name plus a two digit suffix when they are not.
//!
//! # Example
//! ```rust
//! use myca::subject::Subject;
//!
//! # fn example() -> myca::Result<()> {
//! let mut subject = Subject::new();
//! subject.set("C", &["CN"])?;
//! subject.set("O", &["Example Corp"])?;
//! subject.set("CN", &["Example Root CA"])?;
//! assert_eq!(subject.common_name(), "Example Root CA");
//! # Ok(())
//! # }
//! ```

use crate::cert_template::SubjectAltNames;
use crate::error::{CaError, Result};
use openssl::nid::Nid;
use openssl::x509::X509Name;
use rand::distributions::Alphanumeric;
use rand::Rng;

const MIN_RANDOM_NAME_LEN: usize = 6;
const MAX_RANDOM_NAME_LEN: usize = 8;

/// Canonical distinguished name for a certificate request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    country: Vec<String>,
    state: Vec<String>,
    locality: Vec<String>,
    organization: Vec<String>,
    organizational_unit: Vec<String>,
    street_address: Vec<String>,
    postal_code: Vec<String>,
    common_name: String,
    items: Vec<String>,
}

impl Subject {
    /// Create an empty subject
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store one RDN attribute.
    ///
    /// Values are trimmed and empty entries dropped before validation. The
    /// attribute name is case-insensitive.
    ///
    /// # Errors
    /// * [`CaError::InvalidAttribute`] - unknown attribute name
    /// * [`CaError::InvalidCountryCode`] - a C value is not two uppercase letters
    /// * [`CaError::TooManyValues`] - more than one CN value
    pub fn set<S: AsRef<str>>(&mut self, attribute: &str, values: &[S]) -> Result<()> {
        let name = attribute.trim().to_ascii_uppercase();
        let values: Vec<String> = values
            .iter()
            .map(|v| v.as_ref().trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();

        match name.as_str() {
            "C" => {
                if let Some(bad) = values.iter().find(|c| !is_country_code(c)) {
                    return Err(CaError::InvalidCountryCode(bad.clone()));
                }
                self.country = values.clone();
            }
            "ST" => self.state = values.clone(),
            "L" => self.locality = values.clone(),
            "O" => self.organization = values.clone(),
            "OU" => self.organizational_unit = values.clone(),
            "STREET" | "SA" => self.street_address = values.clone(),
            "POSTAL" | "POSTALCODE" | "PC" => self.postal_code = values.clone(),
            "CN" => match values.as_slice() {
                [] => self.common_name.clear(),
                [cn] => self.common_name = cn.clone(),
                _ => return Err(CaError::TooManyValues("CN".to_string())),
            },
            _ => return Err(CaError::InvalidAttribute(attribute.to_string())),
        }

        if let Some(first) = values.into_iter().next() {
            self.items.push(first);
        }

        Ok(())
    }

    /// Fill the common name if it is still empty.
    ///
    /// Priority with hints: first domain, first IP, first email, first URI,
    /// then a random 6-8 character alphanumeric string. Without hints the CN
    /// becomes `<local-username>-<NN>` with `NN` in `01..=99`.
    ///
    /// Calling this on a subject that already has a CN is a no-op, so a
    /// second call never changes anything.
    pub fn ensure_common_name<R: Rng + ?Sized>(
        &mut self,
        hints: Option<&SubjectAltNames>,
        rng: &mut R,
    ) {
        if !self.common_name.is_empty() {
            return;
        }

        self.common_name = match hints {
            None => format!("{}-{:02}", local_username(rng), rng.gen_range(1..=99)),
            Some(san) => san
                .domains
                .first()
                .cloned()
                .or_else(|| san.ips.first().map(|ip| ip.to_string()))
                .or_else(|| san.emails.first().cloned())
                .or_else(|| san.uris.first().map(|u| u.to_string()))
                .unwrap_or_else(|| random_name(rng)),
        };
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn country(&self) -> &[String] {
        &self.country
    }

    pub fn organization(&self) -> &[String] {
        &self.organization
    }

    /// First non-empty value of every attribute set so far, in call order.
    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Build the OpenSSL name in the order C, ST, L, O, OU, STREET, POSTAL, CN.
    ///
    /// Fails with [`CaError::InvalidAttribute`] when the CN is still empty.
    pub fn to_x509_name(&self) -> Result<X509Name> {
        if self.common_name.is_empty() {
            return Err(CaError::InvalidAttribute(
                "CN must be set before issuance".to_string(),
            ));
        }

        let mut name_builder = X509Name::builder()
            .map_err(|e| CaError::signing("Failed to create name builder", e))?;

        let multi_valued = [
            (Nid::COUNTRYNAME, &self.country),
            (Nid::STATEORPROVINCENAME, &self.state),
            (Nid::LOCALITYNAME, &self.locality),
            (Nid::ORGANIZATIONNAME, &self.organization),
            (Nid::ORGANIZATIONALUNITNAME, &self.organizational_unit),
            (Nid::STREETADDRESS, &self.street_address),
            (Nid::POSTALCODE, &self.postal_code),
        ];
        for (nid, values) in multi_valued {
            for value in values {
                name_builder
                    .append_entry_by_nid(nid, value)
                    .map_err(|e| CaError::signing("Failed to set subject entry", e))?;
            }
        }

        name_builder
            .append_entry_by_nid(Nid::COMMONNAME, &self.common_name)
            .map_err(|e| CaError::signing("Failed to set CN", e))?;

        Ok(name_builder.build())
    }
}

fn is_country_code(value: &str) -> bool {
    value.len() == 2 && value.bytes().all(|b| b.is_ascii_uppercase())
}

fn random_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let len = rng.gen_range(MIN_RANDOM_NAME_LEN..=MAX_RANDOM_NAME_LEN);
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn local_username<R: Rng + ?Sized>(rng: &mut R) -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| random_name(rng))
}
