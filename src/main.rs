//! myca command-line interface.
//!
//! Creates and lists root CAs, intermediate CAs and leaf certificates under
//! a CA home directory, and prints a summary of any issued certificate.
//!
//! Exit status is `0` on success, `2` when the input was rejected and can be
//! corrected (bad subject, key spec, SAN, URL or passphrase) and `1` for
//! everything else.

use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use myca::cert_template::{ExtKeyUsage, KeyUsageSet, SubjectAltNames};
use myca::chain_state::{CertificateAuthority, RevocationUrls};
use myca::configs::{AppConfig, IssuanceDefaults};
use myca::export;
use myca::generate_intermediate_ca::IntermediateCABuilder;
use myca::generate_root_ca::RootCABuilder;
use myca::generate_user_keypair::UserCertBuilder;
use myca::inspect::{self, CertificateSummary};
use myca::key_pair::{KeyAlgorithm, KeySpec};
use myca::path_len::MaxPathLen;
use myca::serial_allocator::OsSerialSource;
use myca::storage::{CaHome, Tier};
use myca::subject::Subject;
use myca::{logging, CaError};
use openssl::x509::X509;
use secrecy::SecretString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "myca")]
#[command(
    about = "Local certificate authority: root CAs, intermediate CAs and leaf certificates",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Config file (default: ./myca.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// CA home directory, overrides the config file
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error or off
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Root CA operations
    #[command(subcommand)]
    Rca(RcaCommands),

    /// Intermediate CA operations
    #[command(subcommand)]
    Ica(IcaCommands),

    /// Leaf certificate operations
    #[command(subcommand)]
    Cert(CertCommands),

    /// Print a summary of a PEM or DER certificate
    Show {
        /// Certificate file
        path: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RcaCommands {
    /// Create a self-signed root CA
    Create {
        #[command(flatten)]
        ca: CaArgs,
    },

    /// List root CAs
    List,
}

#[derive(Subcommand)]
enum IcaCommands {
    /// Create an intermediate CA signed by a root or another intermediate
    #[command(group(ArgGroup::new("parent").required(true).args(["rca", "ica"])))]
    Create {
        /// Parent root CA directory name
        #[arg(long)]
        rca: Option<String>,

        /// Parent intermediate CA directory name
        #[arg(long)]
        ica: Option<String>,

        /// Environment variable holding the parent's key passphrase
        #[arg(long)]
        parent_passphrase_env: Option<String>,

        #[command(flatten)]
        ca: CaArgs,
    },

    /// List intermediate CAs
    List,
}

#[derive(Subcommand)]
enum CertCommands {
    /// Create a leaf certificate
    #[command(group(ArgGroup::new("issuer").required(true).args(["rca", "ica", "self_signed"])))]
    Create {
        /// Issuing root CA directory name
        #[arg(long)]
        rca: Option<String>,

        /// Issuing intermediate CA directory name
        #[arg(long)]
        ica: Option<String>,

        /// Self-sign the certificate instead of using a CA
        #[arg(long)]
        self_signed: bool,

        /// Environment variable holding the issuer's key passphrase
        #[arg(long)]
        parent_passphrase_env: Option<String>,

        /// DNS name, repeatable; `*.` wildcards allowed
        #[arg(long)]
        domain: Vec<String>,

        /// IP address, repeatable
        #[arg(long)]
        ip: Vec<String>,

        /// Email address, repeatable
        #[arg(long)]
        email: Vec<String>,

        /// URI, repeatable
        #[arg(long)]
        uri: Vec<String>,

        #[command(flatten)]
        urls: UrlArgs,

        #[command(flatten)]
        subject: SubjectArgs,

        #[command(flatten)]
        key: KeyArgs,

        #[command(flatten)]
        usage: UsageArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
}

/// Arguments shared by root and intermediate creation
#[derive(Args)]
struct CaArgs {
    /// Maximum path length, -1 for unlimited
    #[arg(long, allow_hyphen_values = true)]
    path_len: Option<MaxPathLen>,

    #[command(flatten)]
    urls: UrlArgs,

    #[command(flatten)]
    subject: SubjectArgs,

    #[command(flatten)]
    key: KeyArgs,

    #[command(flatten)]
    usage: UsageArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct SubjectArgs {
    /// Country (C), two uppercase letters
    #[arg(long)]
    country: Vec<String>,

    /// State or province (ST)
    #[arg(long)]
    state: Vec<String>,

    /// Locality (L)
    #[arg(long)]
    locality: Vec<String>,

    /// Organization (O)
    #[arg(long)]
    org: Vec<String>,

    /// Organizational unit (OU)
    #[arg(long)]
    ou: Vec<String>,

    /// Street address (STREET)
    #[arg(long)]
    street: Vec<String>,

    /// Postal code (POSTAL)
    #[arg(long)]
    postal: Vec<String>,

    /// Common name (CN); generated when omitted
    #[arg(long)]
    cn: Option<String>,
}

#[derive(Args)]
struct KeyArgs {
    /// Key algorithm: RSA or ECDSA
    #[arg(long)]
    key_type: Option<String>,

    /// Key size: 2048/4096 for RSA, 256/384/521 for ECDSA
    #[arg(long)]
    key_size: Option<u32>,

    /// Validity in days
    #[arg(long)]
    days: Option<u32>,
}

#[derive(Args)]
struct UrlArgs {
    /// OCSP responder URL, repeatable (leaves use their issuer's URLs unless self-signed)
    #[arg(long)]
    ocsp: Vec<String>,

    /// CA Issuers URL, repeatable
    #[arg(long)]
    issuer_url: Vec<String>,

    /// CRL distribution point URL, repeatable
    #[arg(long)]
    crl: Vec<String>,
}

#[derive(Args)]
struct UsageArgs {
    /// Key usages, comma separated (e.g. "cert-sign,crl-sign")
    #[arg(long)]
    key_usage: Option<KeyUsageSet>,

    /// Extended key usages, comma separated or repeated
    #[arg(long, value_delimiter = ',')]
    eku: Vec<ExtKeyUsage>,
}

#[derive(Args)]
struct OutputArgs {
    /// Directory name under the tier directory (default: from the subject)
    #[arg(long)]
    name: Option<String>,

    /// Environment variable holding the passphrase for the new key
    #[arg(long)]
    passphrase_env: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let recoverable = err
                .downcast_ref::<CaError>()
                .is_some_and(CaError::is_recoverable);
            if recoverable {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };
    logging::init(&config, cli.log_level.as_deref())?;

    let home = CaHome::new(cli.home.clone().unwrap_or_else(|| config.home.clone()));
    tracing::debug!(home = %home.root().display(), "using CA home");

    match cli.command {
        Commands::Rca(RcaCommands::Create { ca }) => create_root(&home, &config.defaults, ca),
        Commands::Rca(RcaCommands::List) => print_names(home.list_rca()?),
        Commands::Ica(IcaCommands::Create {
            rca,
            ica,
            parent_passphrase_env,
            ca,
        }) => {
            let parent = load_parent(&home, rca, ica, parent_passphrase_env.as_deref())?;
            create_intermediate(&home, &config.defaults, &parent, ca)
        }
        Commands::Ica(IcaCommands::List) => print_names(home.list_ica()?),
        Commands::Cert(CertCommands::Create {
            rca,
            ica,
            self_signed,
            parent_passphrase_env,
            domain,
            ip,
            email,
            uri,
            urls,
            subject,
            key,
            usage,
            output,
        }) => {
            let mut san = SubjectAltNames::new();
            for d in &domain {
                san.add_domain(d)?;
            }
            for i in &ip {
                san.add_ip(i)?;
            }
            for e in &email {
                san.add_email(e)?;
            }
            for u in &uri {
                san.add_uri(u)?;
            }

            let issuer = if self_signed {
                None
            } else {
                Some(load_parent(&home, rca, ica, parent_passphrase_env.as_deref())?)
            };
            let leaf = LeafRequest {
                san,
                urls,
                subject,
                key,
                usage,
                output,
            };
            create_leaf(&home, &config.defaults, issuer.as_ref(), leaf)
        }
        Commands::Show { path, json } => show(&path, json),
    }
}

impl SubjectArgs {
    fn to_subject(&self) -> myca::Result<Subject> {
        let mut subject = Subject::new();
        subject.set("C", &self.country)?;
        subject.set("ST", &self.state)?;
        subject.set("L", &self.locality)?;
        subject.set("O", &self.org)?;
        subject.set("OU", &self.ou)?;
        subject.set("STREET", &self.street)?;
        subject.set("POSTAL", &self.postal)?;
        if let Some(cn) = &self.cn {
            subject.set("CN", &[cn])?;
        }
        Ok(subject)
    }
}

impl KeyArgs {
    /// Resolve the key spec, falling back to the configured defaults. A key
    /// type given without a size gets that algorithm's smallest size.
    fn key_spec(&self, defaults: &IssuanceDefaults) -> myca::Result<KeySpec> {
        match (&self.key_type, self.key_size) {
            (Some(algorithm), Some(size)) => KeySpec::parse(algorithm, size),
            (Some(algorithm), None) => {
                let algorithm: KeyAlgorithm = algorithm.parse()?;
                let size = match algorithm {
                    KeyAlgorithm::Rsa => 2048,
                    KeyAlgorithm::Ecdsa => 256,
                };
                KeySpec::new(algorithm, size)
            }
            (None, Some(size)) => KeySpec::parse(&defaults.algorithm, size),
            (None, None) => KeySpec::parse(&defaults.algorithm, defaults.key_size),
        }
    }
}

impl UrlArgs {
    fn parse(&self) -> myca::Result<RevocationUrls> {
        RevocationUrls::parse(&self.ocsp, &self.issuer_url, &self.crl)
    }

    fn is_empty(&self) -> bool {
        self.ocsp.is_empty() && self.issuer_url.is_empty() && self.crl.is_empty()
    }
}

fn passphrase_from_env(var: Option<&str>) -> Result<Option<SecretString>> {
    let Some(var) = var else {
        return Ok(None);
    };
    let raw = std::env::var(var)
        .with_context(|| format!("passphrase variable {} is not set", var))?;
    Ok(export::parse_passphrase(&raw)?)
}

fn load_parent(
    home: &CaHome,
    rca: Option<String>,
    ica: Option<String>,
    passphrase_env: Option<&str>,
) -> Result<CertificateAuthority> {
    let (tier, name) = match (rca, ica) {
        (Some(name), _) => (Tier::Rca, name),
        (None, Some(name)) => (Tier::Ica, name),
        (None, None) => return Err(anyhow!("either --rca or --ica is required")),
    };
    let passphrase = passphrase_from_env(passphrase_env)?;
    Ok(home.load_ca(tier, &name, passphrase.as_ref())?)
}

fn create_root(home: &CaHome, defaults: &IssuanceDefaults, args: CaArgs) -> Result<()> {
    let key_spec = args.key.key_spec(defaults)?;
    let urls = args.urls.parse()?;
    let passphrase = passphrase_from_env(args.output.passphrase_env.as_deref())?;

    let mut subject = args.subject.to_subject()?;
    subject.ensure_common_name(None, &mut rand::thread_rng());
    let dir = home.allocate_dir(Tier::Rca, args.output.name.as_deref(), &subject);

    let mut builder = RootCABuilder::new()
        .subject(subject)
        .key_spec(key_spec)
        .validity_days(args.key.days.unwrap_or(defaults.root_validity_days))
        .revocation_urls(urls)
        .ext_key_usage(args.usage.eku);
    if let Some(path_len) = args.path_len {
        builder = builder.max_path_len(path_len);
    }
    if let Some(key_usage) = args.usage.key_usage {
        builder = builder.key_usage(key_usage);
    }

    let root = builder.build(CaHome::record_path(&dir, Tier::Rca), &mut OsSerialSource)?;
    home.commit_ca(&root, None, passphrase.as_ref())?;

    println!("{}", dir.display());
    Ok(())
}

fn create_intermediate(
    home: &CaHome,
    defaults: &IssuanceDefaults,
    parent: &CertificateAuthority,
    args: CaArgs,
) -> Result<()> {
    let key_spec = args.key.key_spec(defaults)?;
    let urls = args.urls.parse()?;
    let passphrase = passphrase_from_env(args.output.passphrase_env.as_deref())?;

    let mut subject = args.subject.to_subject()?;
    subject.ensure_common_name(None, &mut rand::thread_rng());
    let dir = home.allocate_dir(Tier::Ica, args.output.name.as_deref(), &subject);

    let mut builder = IntermediateCABuilder::new()
        .subject(subject)
        .key_spec(key_spec)
        .validity_days(args.key.days.unwrap_or(defaults.validity_days))
        .revocation_urls(urls)
        .ext_key_usage(args.usage.eku);
    if let Some(path_len) = args.path_len {
        builder = builder.max_path_len(path_len);
    }
    if let Some(key_usage) = args.usage.key_usage {
        builder = builder.key_usage(key_usage);
    }

    let (ica, parent_record) = builder.build(
        parent,
        CaHome::record_path(&dir, Tier::Ica),
        &mut OsSerialSource,
    )?;
    home.commit_ca(&ica, Some(&parent_record), passphrase.as_ref())?;

    println!("{}", dir.display());
    Ok(())
}

struct LeafRequest {
    san: SubjectAltNames,
    urls: UrlArgs,
    subject: SubjectArgs,
    key: KeyArgs,
    usage: UsageArgs,
    output: OutputArgs,
}

fn create_leaf(
    home: &CaHome,
    defaults: &IssuanceDefaults,
    issuer: Option<&CertificateAuthority>,
    request: LeafRequest,
) -> Result<()> {
    let key_spec = request.key.key_spec(defaults)?;
    let passphrase = passphrase_from_env(request.output.passphrase_env.as_deref())?;

    let mut subject = request.subject.to_subject()?;
    let hints = (!request.san.is_empty()).then_some(&request.san);
    subject.ensure_common_name(hints, &mut rand::thread_rng());
    let dir = home.allocate_dir(Tier::Cert, request.output.name.as_deref(), &subject);
    let record_path = CaHome::record_path(&dir, Tier::Cert);

    let mut builder = UserCertBuilder::new()
        .subject(subject)
        .key_spec(key_spec)
        .validity_days(request.key.days.unwrap_or(defaults.validity_days))
        .subject_alt_names(request.san)
        .ext_key_usage(request.usage.eku);
    if let Some(key_usage) = request.usage.key_usage {
        builder = builder.key_usage(key_usage);
    }

    match issuer {
        Some(issuer) => {
            if !request.urls.is_empty() {
                tracing::warn!(
                    "revocation URLs come from the issuing CA, ignoring --ocsp/--issuer-url/--crl"
                );
            }
            let (leaf, issuer_record) = builder.build(issuer, record_path, &mut OsSerialSource)?;
            home.commit_leaf(&leaf, Some(&issuer_record), passphrase.as_ref())?;
        }
        None => {
            let urls = request.urls.parse()?;
            let leaf = builder.build_self_signed(urls, record_path, &mut OsSerialSource)?;
            home.commit_leaf(&leaf, None, passphrase.as_ref())?;
        }
    }

    println!("{}", dir.display());
    Ok(())
}

fn print_names(names: Vec<String>) -> Result<()> {
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

fn read_certificate(path: &Path) -> Result<X509> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    X509::from_pem(&bytes)
        .or_else(|_| X509::from_der(&bytes))
        .with_context(|| format!("{} is not a PEM or DER certificate", path.display()))
}

fn show(path: &Path, json: bool) -> Result<()> {
    let cert = read_certificate(path)?;
    let summary = inspect::summarize(&cert)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &CertificateSummary) {
    println!("Serial:        {}", summary.serial);
    println!("Subject:       {}", summary.subject);
    println!("Issuer:        {}", summary.issuer);
    println!("Not before:    {}", summary.not_before);
    println!("Not after:     {}", summary.not_after);
    match summary.max_path_len.map(MaxPathLen::from_i32) {
        Some(Ok(path_len)) => println!("CA:            yes, path length {}", path_len),
        Some(Err(_)) | None => println!("CA:            no"),
    }
    if let Some(ski) = &summary.subject_key_id {
        println!("Subject KID:   {}", ski);
    }
    if let Some(aki) = &summary.authority_key_id {
        println!("Authority KID: {}", aki);
    }
    println!("Key usage:     {}", summary.key_usage);

    let lists = [
        ("Ext key usage", &summary.ext_key_usage),
        ("OCSP", &summary.ocsp_urls),
        ("CA issuers", &summary.issuer_urls),
        ("CRL", &summary.crl_urls),
        ("DNS", &summary.dns_names),
        ("IP", &summary.ip_addresses),
        ("Email", &summary.emails),
        ("URI", &summary.uris),
    ];
    for (label, values) in lists {
        if !values.is_empty() {
            println!("{:<14} {}", format!("{}:", label), values.join(", "));
        }
    }
}
