//! DER-built X.509v3 extensions.
//!
//! OpenSSL's config-string extension builders cannot express raw key
//! identifier bytes or several URLs per access method cleanly, so these
//! extensions are encoded with `x509-cert` and handed to OpenSSL as opaque
//! DER.
//!
//! Key identifiers are the lowercase hex of `SHA-1(DER(SubjectPublicKeyInfo))`
//! taken as ASCII bytes, i.e. 40 bytes per identifier.

use crate::error::{CaError, Result};
use const_oid::db::rfc5280::{ID_AD_CA_ISSUERS, ID_AD_OCSP};
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::asn1::{Ia5String, OctetString};
use der::Encode;
use openssl::asn1::{Asn1Object, Asn1OctetString};
use openssl::pkey::{HasPublic, PKeyRef};
use openssl::x509::X509Extension;
use sha1::{Digest, Sha1};
use url::Url;
use x509_cert::ext::pkix::crl::dp::DistributionPoint;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{
    AccessDescription, AuthorityInfoAccessSyntax, AuthorityKeyIdentifier, CrlDistributionPoints,
    SubjectKeyIdentifier,
};

/// Key identifier for `key`.
pub fn key_identifier<T: HasPublic>(key: &PKeyRef<T>) -> Result<Vec<u8>> {
    let spki = key
        .public_key_to_der()
        .map_err(|e| CaError::signing("Failed to encode public key", e))?;
    Ok(hex::encode(Sha1::digest(&spki)).into_bytes())
}

pub fn subject_key_identifier(id: &[u8]) -> Result<X509Extension> {
    let ski = SubjectKeyIdentifier(octets(id)?);
    der_extension(&ski, false)
}

pub fn authority_key_identifier(id: &[u8]) -> Result<X509Extension> {
    let aki = AuthorityKeyIdentifier {
        key_identifier: Some(octets(id)?),
        authority_cert_issuer: None,
        authority_cert_serial_number: None,
    };
    der_extension(&aki, false)
}

/// Authority Information Access with OCSP and CA Issuers entries, `None` when
/// both lists are empty.
pub fn authority_info_access(ocsp: &[Url], issuers: &[Url]) -> Result<Option<X509Extension>> {
    let mut descriptions = Vec::with_capacity(ocsp.len() + issuers.len());
    for (method, urls) in [(ID_AD_OCSP, ocsp), (ID_AD_CA_ISSUERS, issuers)] {
        for url in urls {
            descriptions.push(AccessDescription {
                access_method: method,
                access_location: uri_name(url)?,
            });
        }
    }
    if descriptions.is_empty() {
        return Ok(None);
    }
    der_extension(&AuthorityInfoAccessSyntax(descriptions), false).map(Some)
}

/// One distribution point per CRL URL, `None` when the list is empty.
pub fn crl_distribution_points(crl: &[Url]) -> Result<Option<X509Extension>> {
    if crl.is_empty() {
        return Ok(None);
    }
    let points = crl
        .iter()
        .map(|url| {
            Ok(DistributionPoint {
                distribution_point: Some(DistributionPointName::FullName(vec![uri_name(url)?])),
                reasons: None,
                crl_issuer: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    der_extension(&CrlDistributionPoints(points), false).map(Some)
}

fn octets(bytes: &[u8]) -> Result<OctetString> {
    OctetString::new(bytes.to_vec())
        .map_err(|e| CaError::signing("Failed to encode octet string", e))
}

fn uri_name(url: &Url) -> Result<GeneralName> {
    let ia5 = Ia5String::new(url.as_str())
        .map_err(|e| CaError::signing("URL is not IA5", e))?;
    Ok(GeneralName::UniformResourceIdentifier(ia5))
}

fn der_extension<T: Encode + AssociatedOid>(value: &T, critical: bool) -> Result<X509Extension> {
    openssl_extension(T::OID, critical, &encode(value)?)
}

fn encode<T: Encode>(value: &T) -> Result<Vec<u8>> {
    value
        .to_der()
        .map_err(|e| CaError::signing("Failed to DER-encode extension", e))
}

fn openssl_extension(oid: ObjectIdentifier, critical: bool, der: &[u8]) -> Result<X509Extension> {
    let object = Asn1Object::from_str(&oid.to_string())
        .map_err(|e| CaError::signing("Failed to build extension OID", e))?;
    let contents = Asn1OctetString::new_from_bytes(der)
        .map_err(|e| CaError::signing("Failed to wrap extension value", e))?;
    X509Extension::new_from_der(&object, critical, &contents)
        .map_err(|e| CaError::signing("Failed to build extension", e))
}
