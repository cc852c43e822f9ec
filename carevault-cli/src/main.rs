//! `CareVault` CLI for key generation and offline record encryption.

#![warn(clippy::pedantic, clippy::nursery)]

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use carevault::dek::DekManager;
use carevault::domain::{Domain, KekPaths};
use carevault::schema::RecordKind;
use carevault::transform::{to_encrypted_record, to_plaintext_record, wrapped_dek};
use carevault::FieldMap;
use carevault_key_file::FileKeyResolver;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod dataset;

#[derive(Parser)]
#[command(name = "carevault")]
#[command(about = "CareVault key management and record encryption CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// KEK paths, one per domain, relative to the key directory.
#[derive(Args, Debug, Clone)]
struct KekArgs {
    /// Key directory holding the KEK files
    #[arg(long, default_value = "./keys")]
    keys: PathBuf,

    /// KEK path for general data
    #[arg(long, env = "KEK_GENERAL_PATH")]
    kek_general_path: Option<String>,

    /// KEK path for contact data
    #[arg(long, env = "KEK_CONTACT_PATH")]
    kek_contact_path: Option<String>,

    /// KEK path for clinical data
    #[arg(long, env = "KEK_CLINICAL_PATH")]
    kek_clinical_path: Option<String>,

    /// KEK path for financial data
    #[arg(long, env = "KEK_FINANCIAL_PATH")]
    kek_financial_path: Option<String>,
}

impl KekArgs {
    fn paths(&self) -> KekPaths {
        let configured = [
            (Domain::General, &self.kek_general_path),
            (Domain::Contact, &self.kek_contact_path),
            (Domain::Clinical, &self.kek_clinical_path),
            (Domain::Financial, &self.kek_financial_path),
        ];
        let paths = configured.into_iter().fold(KekPaths::default(), |paths, (domain, path)| {
            match path {
                Some(path) => paths.with(domain, path.as_str()),
                None => paths,
            }
        });
        for domain in paths.missing() {
            warn!(%domain, var = domain.env_var(), "KEK path is not set");
        }
        paths
    }

    fn dek_manager(&self) -> Result<DekManager<FileKeyResolver>> {
        let resolver = FileKeyResolver::new(&self.keys)
            .with_context(|| format!("opening key directory {}", self.keys.display()))?;
        Ok(DekManager::new(resolver, self.paths()))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one KEK file per domain
    Keygen {
        /// Output directory for keys
        #[arg(short, long, default_value = "./keys")]
        output: PathBuf,
    },
    /// Encrypt one plaintext record under a fresh DEK
    Encrypt {
        /// Record kind, e.g. `allergy` or `allergies`
        #[arg(long)]
        kind: RecordKind,
        /// JSON file holding the record (`-` for stdin)
        #[arg(long, default_value = "-")]
        input: PathBuf,
        #[command(flatten)]
        keys: KekArgs,
    },
    /// Decrypt one stored record using its `encrypted_dek`
    Decrypt {
        /// Record kind, e.g. `allergy` or `allergies`
        #[arg(long)]
        kind: RecordKind,
        /// JSON file holding the encrypted record (`-` for stdin)
        #[arg(long, default_value = "-")]
        input: PathBuf,
        #[command(flatten)]
        keys: KekArgs,
    },
    /// Encrypt a plaintext dataset into a JSONL import payload
    EncryptDataset {
        /// Directory with `residents.json` and `<collection>.json` files
        #[arg(long)]
        input: PathBuf,
        /// JSONL output file
        #[arg(long)]
        output: PathBuf,
        /// Tenant the residents belong to
        #[arg(long, env = "CAREVAULT_TENANT")]
        tenant: String,
        #[command(flatten)]
        keys: KekArgs,
    },
}

fn read_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text).context("reading stdin")?;
        return Ok(text);
    }
    fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))
}

fn read_record(input: &Path) -> Result<FieldMap> {
    let text = read_input(input)?;
    match serde_json::from_str(&text).context("parsing record JSON")? {
        serde_json::Value::Object(record) => Ok(record),
        _ => bail!("record must be a JSON object"),
    }
}

fn keygen(output: &Path) -> Result<()> {
    let paths = FileKeyResolver::init(output)
        .with_context(|| format!("writing keys to {}", output.display()))?;

    let mut env = String::new();
    for domain in Domain::ALL {
        env.push_str(&format!("{}={}\n", domain.env_var(), paths.path(domain)?));
    }
    fs::write(output.join("kek-paths.env"), env).context("writing kek-paths.env")?;

    info!(dir = %output.display(), "generated KEKs");
    println!("Generated 4 KEKs in {}", output.display());
    println!("Source {}/kek-paths.env to configure them.", output.display());
    Ok(())
}

async fn encrypt(kind: RecordKind, input: &Path, keys: &KekArgs) -> Result<()> {
    let record = read_record(input)?;
    let manager = keys.dek_manager()?;
    let key = manager.generate_data_key(kind.domain()).await?;
    let encrypted = to_encrypted_record(kind, &record, &key)?;
    println!("{}", serde_json::to_string_pretty(&encrypted)?);
    Ok(())
}

async fn decrypt(kind: RecordKind, input: &Path, keys: &KekArgs) -> Result<()> {
    let record = read_record(input)?;
    let manager = keys.dek_manager()?;
    let wrapped = wrapped_dek(&record)?;
    let dek = manager.decrypt_data_key(&wrapped, kind.domain()).await?;
    let plaintext = to_plaintext_record(kind, &record, &dek)?;
    println!("{}", serde_json::to_string_pretty(&plaintext)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { output } => keygen(&output),
        Commands::Encrypt { kind, input, keys } => encrypt(kind, &input, &keys).await,
        Commands::Decrypt { kind, input, keys } => decrypt(kind, &input, &keys).await,
        Commands::EncryptDataset { input, output, tenant, keys } => {
            let manager = keys.dek_manager()?;
            manager.paths().validate()?;
            let summary = dataset::encrypt_dataset(manager, &tenant, &input, &output).await?;
            println!(
                "Wrote {} documents for {} residents to {} ({} skipped)",
                summary.documents,
                summary.residents,
                output.display(),
                summary.skipped
            );
            Ok(())
        }
    }
}
