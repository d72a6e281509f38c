//! myca - Local Certificate Authority Toolkit
//!
//! A library and command-line tool for running a small private PKI on the
//! local filesystem. It creates root CAs, intermediate CAs of any depth and
//! leaf certificates, and keeps per-CA serial state in versioned JSON records
//! next to the exported key material.
//!
//! # Features
//!
//! - **Configurable hierarchy**: roots, chained intermediates and leaves, with
//!   path-length constraints validated before anything is issued
//! - **Key types**: RSA 2048/4096 and ECDSA P-256/P-384/P-521
//! - **Monotonic serials**: a random 40-bit starting point per CA, then a
//!   random positive step for every certificate the CA signs
//! - **Revocation endpoints**: OCSP, CA Issuers and CRL URLs stamped into
//!   every certificate a CA signs
//! - **Export formats**: PEM, full chain, PKCS#8 key, PEM bundle and PKCS#12
//! - **Write-after-success**: state is only persisted once signing succeeded
//!
//! # Quick Start
//!
//! ```bash
//! myca rca create --cn "Example Root" --ocsp http://ocsp.example.com
//! myca ica create --rca ExampleRoot --cn "Example Issuing CA" --path-len 0
//! myca cert create --ica ExampleIssuingCA --domain example.com --eku server-auth
//! myca show myca-home/cert/example.com/cert.pem
//! ```
//!
//! # Architecture
//!
//! ```text
//! Root CA (self-signed, serial 1)
//!   ├── Intermediate CA (pathlen n, signed by Root)
//!   │     ├── Intermediate CA (pathlen < n)
//!   │     └── Leaf Certificate
//!   └── Leaf Certificate
//!
//! Self-signed Leaf (no hierarchy, no CA record)
//! ```
//!
//! - [`subject`]: distinguished name assembly and common-name fallback
//! - [`chain_state`]: persistent CA and leaf records
//! - [`serial_allocator`]: serial cursor advancement
//! - [`key_pair`]: RSA/ECDSA key generation
//! - [`cert_template`]: SANs, key usages, validity and certificate templates
//! - [`path_len`]: path-length constraint checks
//! - [`signing`]: certificate assembly, signing and chain building
//! - [`generate_root_ca`], [`generate_intermediate_ca`],
//!   [`generate_user_keypair`]: issuance builders for each tier
//! - [`storage`]: home directory layout, loading and committing
//! - [`export`]: PEM, bundle and PKCS#12 output
//! - [`inspect`]: reading issued certificates back
//!
//! # Example Usage
//!
//! ```no_run
//! use myca::generate_root_ca::RootCABuilder;
//! use myca::generate_user_keypair::UserCertBuilder;
//! use myca::cert_template::SubjectAltNames;
//! use myca::serial_allocator::OsSerialSource;
//! use myca::storage::{CaHome, Tier};
//! use myca::subject::Subject;
//!
//! fn main() -> myca::Result<()> {
//!     let home = CaHome::new("myca-home");
//!
//!     let mut subject = Subject::new();
//!     subject.set("CN", &["Example Root"])?;
//!     let dir = home.allocate_dir(Tier::Rca, None, &subject);
//!     let root = RootCABuilder::new()
//!         .subject(subject)
//!         .build(CaHome::record_path(&dir, Tier::Rca), &mut OsSerialSource)?;
//!     home.commit_ca(&root, None, None)?;
//!
//!     let mut san = SubjectAltNames::new();
//!     san.add_domain("example.com")?;
//!     let mut leaf_subject = Subject::new();
//!     leaf_subject.ensure_common_name(Some(&san), &mut rand::thread_rng());
//!     let dir = home.allocate_dir(Tier::Cert, None, &leaf_subject);
//!     let (leaf, root_record) = UserCertBuilder::new()
//!         .subject(leaf_subject)
//!         .subject_alt_names(san)
//!         .build(&root, CaHome::record_path(&dir, Tier::Cert), &mut OsSerialSource)?;
//!     home.commit_leaf(&leaf, Some(&root_record), None)?;
//!
//!     Ok(())
//! }
//! ```

pub mod cert_template;
pub mod chain_state;
pub mod configs;
pub mod error;
pub mod export;
pub mod extensions;
pub mod generate_intermediate_ca;
pub mod generate_root_ca;
pub mod generate_user_keypair;
pub mod inspect;
pub mod key_pair;
pub mod logging;
pub mod path_len;
pub mod serial_allocator;
pub mod signing;
pub mod storage;
pub mod subject;

pub use error::{CaError, Result};
