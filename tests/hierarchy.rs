//! Integration tests for myca.
//!
//! These tests drive complete issuance workflows through the public API:
//! building a hierarchy, committing it to a CA home, reloading it and
//! issuing further certificates from the reloaded state.

use myca::cert_template::{ExtKeyUsage, SubjectAltNames};
use myca::chain_state::{CaRecord, CertificateAuthority, RevocationUrls};
use myca::error::{CaError, Result};
use myca::generate_intermediate_ca::IntermediateCABuilder;
use myca::generate_root_ca::RootCABuilder;
use myca::generate_user_keypair::UserCertBuilder;
use myca::inspect;
use myca::key_pair::KeySpec;
use myca::path_len::MaxPathLen;
use myca::serial_allocator::ScriptedSerialSource;
use myca::storage::{CaHome, Tier};
use myca::subject::Subject;
use openssl::x509::X509;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use tempfile::TempDir;

fn subject(cn: &str) -> Subject {
    let mut subject = Subject::new();
    subject.set("CN", &[cn]).unwrap();
    subject
}

fn root_urls() -> RevocationUrls {
    RevocationUrls::parse(
        &["http://ocsp.example.com/root"],
        &["http://pki.example.com/root.cer"],
        &["http://pki.example.com/root.crl"],
    )
    .unwrap()
}

fn create_root(home: &CaHome, cn: &str, cursor: u64) -> Result<CertificateAuthority> {
    let subject = subject(cn);
    let dir = home.allocate_dir(Tier::Rca, None, &subject);
    RootCABuilder::new()
        .subject(subject)
        .revocation_urls(root_urls())
        .build(
            CaHome::record_path(&dir, Tier::Rca),
            &mut ScriptedSerialSource::new([cursor]),
        )
}

fn create_ica(
    home: &CaHome,
    parent: &CertificateAuthority,
    cn: &str,
    path_len: i32,
    draws: &[u64],
) -> Result<(CertificateAuthority, CaRecord)> {
    let subject = subject(cn);
    let dir = home.allocate_dir(Tier::Ica, None, &subject);
    IntermediateCABuilder::new()
        .subject(subject)
        .max_path_len(MaxPathLen::from_i32(path_len)?)
        .build(
            parent,
            CaHome::record_path(&dir, Tier::Ica),
            &mut ScriptedSerialSource::new(draws.iter().copied()),
        )
}

fn leaf_for(domain: &str) -> UserCertBuilder {
    let mut san = SubjectAltNames::new();
    san.add_domain(domain).unwrap();
    UserCertBuilder::new()
        .subject_alt_names(san)
        .ext_key_usage(vec![ExtKeyUsage::ServerAuth])
}

#[test]
fn test_path_length_is_enforced_down_the_chain() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let home = CaHome::new(temp_dir.path());

    // 1. Unlimited root
    let root = create_root(&home, "Root1", 1000)?;
    assert_eq!(inspect::max_path_len(&root.cert)?, MaxPathLen::Unlimited);

    // 2. Intermediate limited to 2 under the unlimited root
    let (ca1, _) = create_ica(&home, &root, "CA1", 2, &[3, 500])?;
    assert_eq!(inspect::max_path_len(&ca1.cert)?, MaxPathLen::Limited(2));

    // 3. Asking for more than the parent was granted fails
    let err = create_ica(&home, &ca1, "CA2", 3, &[4, 600]).unwrap_err();
    assert!(matches!(err, CaError::PathLenViolation(_)), "{err}");

    // 4. So does an unlimited child under a limited parent
    let err = create_ica(&home, &ca1, "CA2", -1, &[4, 600]).unwrap_err();
    assert!(matches!(err, CaError::PathLenViolation(_)), "{err}");

    // 5. A smaller limit is fine, and a 0 parent refuses every child CA
    let (ca2, _) = create_ica(&home, &ca1, "CA2", 1, &[4, 600])?;
    let (ca3, _) = create_ica(&home, &ca2, "CA3", 0, &[5, 700])?;
    let err = create_ica(&home, &ca3, "CA4", 0, &[6, 800]).unwrap_err();
    assert!(matches!(err, CaError::PathLenViolation(_)), "{err}");

    // 6. Leaves can still be issued under the 0 CA
    let (leaf, _) = leaf_for("deep.example.com").build(
        &ca3,
        temp_dir.path().join("leaf.json"),
        &mut ScriptedSerialSource::new([9]),
    )?;
    assert_eq!(X509::stack_from_pem(&leaf.fullchain).unwrap().len(), 5);

    Ok(())
}

#[test]
fn test_leaf_carries_issuer_revocation_urls() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let home = CaHome::new(temp_dir.path());
    let root = create_root(&home, "Root1", 10)?;

    let (leaf, _) = leaf_for("www.example.com").build(
        &root,
        temp_dir.path().join("leaf.json"),
        &mut ScriptedSerialSource::new([1]),
    )?;

    let summary = inspect::summarize(&leaf.cert)?;
    assert_eq!(summary.ocsp_urls, vec!["http://ocsp.example.com/root"]);
    assert_eq!(summary.issuer_urls, vec!["http://pki.example.com/root.cer"]);
    assert_eq!(summary.crl_urls, vec!["http://pki.example.com/root.crl"]);
    assert_eq!(summary.ext_key_usage, vec!["server-auth"]);
    Ok(())
}

#[test]
fn test_unsupported_key_spec_is_rejected() {
    let err = KeySpec::parse("RSA", 3072).unwrap_err();
    assert!(matches!(
        err,
        CaError::UnsupportedKeySpec { ref algorithm, size: 3072 } if algorithm == "RSA"
    ));
    assert!(err.is_recoverable());

    assert!(KeySpec::parse("ECDSA", 224).is_err());
    assert!(KeySpec::parse("DSA", 2048).is_err());
    assert!(KeySpec::parse("ecc", 384).is_ok());
}

#[test]
fn test_serials_advance_and_skip_zero_draws() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let home = CaHome::new(temp_dir.path());
    let mut root = create_root(&home, "Root1", 100)?;
    assert_eq!(root.record.serial_cursor().to_hex(), "64");
    assert_eq!(inspect::summarize(&root.cert)?.serial, "01");

    // A zero draw is discarded and the next one used
    let mut source = ScriptedSerialSource::new([0, 5, 7]);
    let (first, record) = leaf_for("a.example.com").build(
        &root,
        temp_dir.path().join("a.json"),
        &mut source,
    )?;
    root.record = record;
    let (second, record) = leaf_for("b.example.com").build(
        &root,
        temp_dir.path().join("b.json"),
        &mut source,
    )?;
    assert_eq!(source.remaining(), 0);

    assert_eq!(first.record.serial, "69");
    assert_eq!(second.record.serial, "70");
    assert_eq!(record.serial_cursor().to_hex(), "70");
    assert_ne!(
        first.cert.serial_number().to_bn().unwrap(),
        second.cert.serial_number().to_bn().unwrap()
    );
    Ok(())
}

#[test]
fn test_authority_key_id_matches_issuer_subject_key_id() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let home = CaHome::new(temp_dir.path());
    let root = create_root(&home, "Root1", 10)?;
    let (ica, _) = create_ica(&home, &root, "Issuing", 0, &[2, 20])?;
    let (leaf, _) = leaf_for("api.example.com").build(
        &ica,
        temp_dir.path().join("leaf.json"),
        &mut ScriptedSerialSource::new([3]),
    )?;

    let root_summary = inspect::summarize(&root.cert)?;
    let ica_summary = inspect::summarize(&ica.cert)?;
    let leaf_summary = inspect::summarize(&leaf.cert)?;

    assert!(root_summary.subject_key_id.is_some());
    assert_eq!(root_summary.authority_key_id, root_summary.subject_key_id);
    assert_eq!(ica_summary.authority_key_id, root_summary.subject_key_id);
    assert_eq!(leaf_summary.authority_key_id, ica_summary.subject_key_id);
    assert_eq!(leaf_summary.issuer, ica_summary.subject);

    // Each certificate in the chain verifies under the next one
    assert!(leaf.cert.verify(&ica.cert.public_key().unwrap()).unwrap());
    assert!(ica.cert.verify(&root.cert.public_key().unwrap()).unwrap());
    assert!(root.cert.verify(&root.cert.public_key().unwrap()).unwrap());
    Ok(())
}

#[test]
fn test_fullchain_runs_from_leaf_to_root() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let home = CaHome::new(temp_dir.path());
    let root = create_root(&home, "Root1", 10)?;
    let (ica, _) = create_ica(&home, &root, "Issuing", 0, &[2, 20])?;
    let (leaf, _) = leaf_for("chain.example.com").build(
        &ica,
        temp_dir.path().join("leaf.json"),
        &mut ScriptedSerialSource::new([3]),
    )?;

    let chain = X509::stack_from_pem(&leaf.fullchain).unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[0].to_der().unwrap(), leaf.cert.to_der().unwrap());
    assert_eq!(chain[1].to_der().unwrap(), ica.cert.to_der().unwrap());
    assert_eq!(chain[2].to_der().unwrap(), root.cert.to_der().unwrap());
    Ok(())
}

#[test]
fn test_ensure_common_name_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut san = SubjectAltNames::new();
    san.add_ip("192.0.2.10").unwrap();
    san.add_domain("svc.example.com").unwrap();

    let mut subject = Subject::new();
    subject.ensure_common_name(Some(&san), &mut rng);
    assert_eq!(subject.common_name(), "svc.example.com");
    subject.ensure_common_name(None, &mut rng);
    assert_eq!(subject.common_name(), "svc.example.com");

    let mut generated = Subject::new();
    generated.ensure_common_name(None, &mut rng);
    let first = generated.common_name().to_string();
    assert!(!first.is_empty());
    generated.ensure_common_name(None, &mut rng);
    assert_eq!(generated.common_name(), first);
}

#[test]
fn test_commit_reload_and_continue_issuing() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let home = CaHome::new(temp_dir.path());

    // 1. Root committed with an encrypted key
    let root = create_root(&home, "Root1", 100)?;
    let root_pass = myca::export::parse_passphrase("r00t!pass")?;
    home.commit_ca(&root, None, root_pass.as_ref())?;

    // 2. Intermediate issued from the reloaded root
    let root = home.load_ca(Tier::Rca, "Root1", root_pass.as_ref())?;
    let (ica, root_record) = create_ica(&home, &root, "Issuing", 0, &[11, 5000])?;
    home.commit_ca(&ica, Some(&root_record), None)?;
    assert_eq!(home.list_rca()?, vec!["Root1"]);
    assert_eq!(home.list_ica()?, vec!["Issuing"]);

    // 3. The root's advanced cursor was persisted
    let reloaded_root = CaRecord::load(root.record.path())?;
    assert_eq!(reloaded_root.serial_cursor().to_hex(), "6F");
    assert_eq!(inspect::summarize(&ica.cert)?.serial, "6F");

    // 4. Leaf issued from the reloaded intermediate
    let ica = home.load_ca(Tier::Ica, "Issuing", None)?;
    let mut leaf_subject = Subject::new();
    let builder = leaf_for("shop.example.com");
    let mut san = SubjectAltNames::new();
    san.add_domain("shop.example.com")?;
    leaf_subject.ensure_common_name(Some(&san), &mut StdRng::seed_from_u64(1));
    let dir = home.allocate_dir(Tier::Cert, None, &leaf_subject);
    let (leaf, ica_record) = builder.subject(leaf_subject).build(
        &ica,
        CaHome::record_path(&dir, Tier::Cert),
        &mut ScriptedSerialSource::new([8]),
    )?;
    home.commit_leaf(&leaf, Some(&ica_record), None)?;

    assert_eq!(dir, temp_dir.path().join("cert").join("shop.example.com"));
    assert_eq!(CaRecord::load(ica.record.path())?.serial_cursor().to_hex(), "1390");
    assert_eq!(leaf.record.serial, "1390");

    // 5. What was written reads back the same
    let written = X509::from_pem(&fs::read(dir.join(myca::export::CERT_PEM))?).unwrap();
    assert_eq!(inspect::summarize(&written)?, inspect::summarize(&leaf.cert)?);
    let record = myca::chain_state::CertRecord::load(dir.join(myca::storage::CERT_RECORD_FILE))?;
    assert_eq!(record.serial, "1390");
    assert_eq!(record.issuer, inspect::summarize(&ica.cert)?.subject);
    assert!(!record.self_signed);
    Ok(())
}

#[test]
fn test_failed_issuance_leaves_parent_state_untouched() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let home = CaHome::new(temp_dir.path());
    let root = create_root(&home, "Root1", 100)?;
    home.commit_ca(&root, None, None)?;
    let before = fs::read(root.record.path())?;

    // Path length failure
    let (ca0, _) = create_ica(&home, &root, "Zero", 0, &[1, 1])?;
    assert!(create_ica(&home, &ca0, "Child", 0, &[1, 1]).is_err());

    // Exhausted serial source fails after the parent's serial was drawn
    let root = home.load_ca(Tier::Rca, "Root1", None)?;
    let err = create_ica(&home, &root, "Starved", 0, &[1]).unwrap_err();
    assert!(matches!(err, CaError::SigningError(_)), "{err}");

    assert_eq!(fs::read(root.record.path())?, before);
    assert!(home.list_ica()?.is_empty());
    Ok(())
}

#[test]
fn test_unwritable_leaf_directory_keeps_issuer_cursor() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let home = CaHome::new(temp_dir.path());
    let root = create_root(&home, "Root1", 100)?;
    home.commit_ca(&root, None, None)?;
    let before = fs::read(root.record.path())?;

    // A regular file where the leaf tier directory belongs
    fs::write(home.tier_dir(Tier::Cert), b"not a directory")?;

    let root = home.load_ca(Tier::Rca, "Root1", None)?;
    let dir = home.allocate_dir(Tier::Cert, Some("example.com"), &subject("example.com"));
    let (leaf, root_record) = leaf_for("example.com")
        .subject(subject("example.com"))
        .build(
            &root,
            CaHome::record_path(&dir, Tier::Cert),
            &mut ScriptedSerialSource::new([5]),
        )?;
    assert_ne!(root_record.serial_cursor(), root.record.serial_cursor());

    let err = home.commit_leaf(&leaf, Some(&root_record), None).unwrap_err();
    assert!(matches!(err, CaError::IoError(_)), "{err}");

    assert_eq!(fs::read(root.record.path())?, before);
    let reloaded = CaRecord::load(root.record.path())?;
    assert_eq!(reloaded.serial_cursor().to_hex(), "64");
    Ok(())
}

#[test]
fn test_self_signed_leaf_has_no_ca_record() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let home = CaHome::new(temp_dir.path());
    let mut san = SubjectAltNames::new();
    san.add_email("dev@example.com")?;
    let mut subject = Subject::new();
    subject.ensure_common_name(Some(&san), &mut StdRng::seed_from_u64(3));
    let dir = home.allocate_dir(Tier::Cert, None, &subject);

    let leaf = UserCertBuilder::new()
        .subject(subject)
        .subject_alt_names(san)
        .build_self_signed(
            RevocationUrls::default(),
            CaHome::record_path(&dir, Tier::Cert),
            &mut ScriptedSerialSource::new([0x1234]),
        )?;
    home.commit_leaf(&leaf, None, None)?;

    let summary = inspect::summarize(&leaf.cert)?;
    assert_eq!(summary.serial, "1234");
    assert_eq!(summary.subject, summary.issuer);
    assert!(summary.ocsp_urls.is_empty());
    assert!(leaf.record.self_signed);
    assert!(dir.join(myca::storage::CERT_RECORD_FILE).is_file());
    assert!(!dir.join(myca::storage::CA_RECORD_FILE).exists());
    assert!(home.list_rca()?.is_empty());
    Ok(())
}
