//! Signing and chain assembly.
//!
//! [`issue`] turns a [`CertTemplate`] into a signed X.509v3 certificate and
//! the matching fullchain. The issuer is either the certificate itself
//! (roots and self-signed leaves) or a parent CA.
//!
//! # Chain Layout
//! ```text
//! fullchain(root)  = PEM(root)
//! fullchain(child) = PEM(child) + fullchain(parent)
//! ```

use crate::cert_template::{CertTemplate, ExtKeyUsage, TemplateKind};
use crate::error::{CaError, Result};
use crate::extensions;
use crate::key_pair;
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::BigNumRef;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509Builder, X509Ref, X509};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2

/// Who signs the certificate.
pub enum Issuer<'a> {
    /// The subject key signs its own certificate
    SelfSigned,
    /// A parent CA signs
    Parent {
        cert: &'a X509Ref,
        key: &'a PKeyRef<Private>,
        fullchain: &'a [u8],
    },
}

/// A freshly signed certificate and its chain.
pub struct SignedCert {
    pub cert: X509,
    pub fullchain: Vec<u8>,
}

/// Sign `template` for `subject_key` with the given serial.
///
/// The serial must already be allocated; nothing here touches CA state, so a
/// failure leaves the caller's record untouched.
pub fn issue(
    template: &CertTemplate,
    serial: &BigNumRef,
    subject_key: &PKeyRef<Private>,
    issuer: Issuer<'_>,
) -> Result<SignedCert> {
    let subject_name = template.subject.to_x509_name()?;

    let mut builder =
        X509Builder::new().map_err(|e| CaError::signing("Failed to create X509 builder", e))?;
    builder
        .set_version(X509_VERSION_3)
        .map_err(|e| CaError::signing("Failed to set version", e))?;

    let serial = Asn1Integer::from_bn(serial)
        .map_err(|e| CaError::signing("Failed to convert serial", e))?;
    builder
        .set_serial_number(&serial)
        .map_err(|e| CaError::signing("Failed to set serial number", e))?;

    builder
        .set_subject_name(&subject_name)
        .map_err(|e| CaError::signing("Failed to set subject name", e))?;
    match &issuer {
        Issuer::SelfSigned => builder.set_issuer_name(&subject_name),
        Issuer::Parent { cert, .. } => builder.set_issuer_name(cert.subject_name()),
    }
    .map_err(|e| CaError::signing("Failed to set issuer name", e))?;

    builder
        .set_pubkey(subject_key)
        .map_err(|e| CaError::signing("Failed to set public key", e))?;

    let not_before = Asn1Time::from_unix(template.validity.not_before.timestamp())
        .map_err(|e| CaError::signing("Failed to convert notBefore", e))?;
    let not_after = Asn1Time::from_unix(template.validity.not_after.timestamp())
        .map_err(|e| CaError::signing("Failed to convert notAfter", e))?;
    builder
        .set_not_before(&not_before)
        .map_err(|e| CaError::signing("Failed to set notBefore", e))?;
    builder
        .set_not_after(&not_after)
        .map_err(|e| CaError::signing("Failed to set notAfter", e))?;

    let basic_constraints = match &template.kind {
        TemplateKind::Ca { max_path_len } => {
            let mut bc = BasicConstraints::new();
            bc.critical().ca();
            if let Some(n) = max_path_len.constraint() {
                bc.pathlen(n);
            }
            bc.build()
        }
        TemplateKind::Leaf { .. } => BasicConstraints::new().critical().build(),
    }
    .map_err(|e| CaError::signing("Failed to build basic constraints", e))?;
    builder
        .append_extension(basic_constraints)
        .map_err(|e| CaError::signing("Failed to add basic constraints", e))?;

    if let Some(ku) = template.key_usage.to_extension()? {
        append(&mut builder, ku, "key usage")?;
    }
    if let Some(eku) = ExtKeyUsage::to_extension(&template.ext_key_usage)? {
        append(&mut builder, eku, "extended key usage")?;
    }

    if let TemplateKind::Leaf { san } = &template.kind {
        if !san.is_empty() {
            let mut alt = SubjectAlternativeName::new();
            for domain in &san.domains {
                alt.dns(domain);
            }
            for ip in &san.ips {
                alt.ip(&ip.to_string());
            }
            for email in &san.emails {
                alt.email(email);
            }
            for uri in &san.uris {
                alt.uri(uri.as_str());
            }
            let context = match &issuer {
                Issuer::SelfSigned => builder.x509v3_context(None, None),
                Issuer::Parent { cert, .. } => builder.x509v3_context(Some(*cert), None),
            };
            let ext = alt
                .build(&context)
                .map_err(|e| CaError::signing("Failed to build subject alternative name", e))?;
            append(&mut builder, ext, "subject alternative name")?;
        }
    }

    let ski = extensions::key_identifier(subject_key)?;
    let aki = match &issuer {
        Issuer::SelfSigned => ski.clone(),
        Issuer::Parent { cert, .. } => issuer_key_identifier(cert)?,
    };
    append(&mut builder, extensions::subject_key_identifier(&ski)?, "subject key identifier")?;
    append(&mut builder, extensions::authority_key_identifier(&aki)?, "authority key identifier")?;

    let urls = &template.urls;
    if let Some(aia) = extensions::authority_info_access(&urls.ocsp, &urls.issuer)? {
        append(&mut builder, aia, "authority information access")?;
    }
    if let Some(cdp) = extensions::crl_distribution_points(&template.urls.crl)? {
        append(&mut builder, cdp, "CRL distribution points")?;
    }

    let signing_key: &PKeyRef<Private> = match &issuer {
        Issuer::SelfSigned => subject_key,
        Issuer::Parent { key, .. } => *key,
    };
    builder
        .sign(signing_key, key_pair::signature_digest(signing_key))
        .map_err(|e| CaError::signing("Failed to sign certificate", e))?;

    let cert = builder.build();
    let mut fullchain = cert
        .to_pem()
        .map_err(|e| CaError::signing("Failed to encode certificate", e))?;
    if let Issuer::Parent { fullchain: parent_chain, .. } = issuer {
        fullchain.extend_from_slice(parent_chain);
    }

    tracing::info!(
        subject = template.subject.common_name(),
        serial = %serial_hex(&cert)?,
        ca = template.is_ca(),
        "certificate signed"
    );

    Ok(SignedCert { cert, fullchain })
}

/// The issuer's own SKI, or one computed from its public key when the
/// extension is absent.
fn issuer_key_identifier(cert: &X509Ref) -> Result<Vec<u8>> {
    if let Some(ski) = cert.subject_key_id() {
        return Ok(ski.as_slice().to_vec());
    }
    let key: PKey<_> = cert
        .public_key()
        .map_err(|e| CaError::signing("Failed to read issuer public key", e))?;
    extensions::key_identifier(&key)
}

fn append(builder: &mut X509Builder, ext: openssl::x509::X509Extension, what: &str) -> Result<()> {
    builder
        .append_extension(ext)
        .map_err(|e| CaError::signing(&format!("Failed to add {}", what), e))
}

/// Uppercase hex serial of `cert`.
pub fn serial_hex(cert: &X509Ref) -> Result<String> {
    let bn = cert
        .serial_number()
        .to_bn()
        .map_err(|e| CaError::signing("Failed to read serial", e))?;
    let hex = bn
        .to_hex_str()
        .map_err(|e| CaError::signing("Failed to format serial", e))?;
    Ok(hex.to_string())
}
