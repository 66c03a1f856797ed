// 💧 Cash-Flow Risk CLI - build, verify, config
// Thin wrapper: everything real lives in the library.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cashflow_risk::{
    run_build, verify_package, BuildOptions, CashflowEngine, EngineConfig, PublishPackage, ReconInputs,
    ReportingPeriod,
};

const DEFAULT_KEY_ENV: &str = "CASHFLOW_SIGNING_KEY";

#[derive(Parser)]
#[command(name = "cashflow-risk")]
#[command(about = "Cash-flow classification, risk scoring and publish packaging for bank exports")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build snapshot, report and signed publish package for a period
    Build {
        /// Bank statement export (CSV)
        #[arg(long)]
        bank: PathBuf,

        /// First day of the period (YYYY-MM-DD)
        #[arg(long)]
        period_start: String,

        /// Last day of the period (YYYY-MM-DD)
        #[arg(long)]
        period_end: String,

        /// Output root; data/, reports/ and publish/ are created under it
        #[arg(long, default_value = ".")]
        out_root: PathBuf,

        /// Engine config JSON (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// 0-based row holding the column names (guessed when omitted)
        #[arg(long)]
        header_row: Option<usize>,

        /// AR cash receipts for the period, for reconciliation
        #[arg(long)]
        ar_receipts: Option<f64>,

        /// AP cash payments for the period, for reconciliation
        #[arg(long)]
        ap_payments: Option<f64>,

        /// Environment variable holding the HMAC signing key
        #[arg(long, default_value = DEFAULT_KEY_ENV)]
        signing_key_env: String,
    },
    /// Verify a publish package against the files on disk
    Verify {
        /// Path to the publish package JSON
        package: PathBuf,

        /// Root the artifact paths are relative to
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Environment variable holding the HMAC signing key
        #[arg(long, default_value = DEFAULT_KEY_ENV)]
        signing_key_env: String,
    },
    /// Print or validate engine configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default config as JSON
    Default,
    /// Validate a config file
    Validate {
        /// Path to config file
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info,cashflow_risk=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            bank,
            period_start,
            period_end,
            out_root,
            config,
            header_row,
            ar_receipts,
            ap_payments,
            signing_key_env,
        } => {
            let period = ReportingPeriod::parse(&period_start, &period_end)?;
            let config = match config {
                Some(path) => EngineConfig::from_file(&path)?,
                None => EngineConfig::default(),
            };
            let options = BuildOptions {
                bank_csv: bank,
                period,
                out_root,
                header_row,
                recon: ReconInputs {
                    ar_receipts,
                    ap_payments,
                },
                signing_key: signing_key(&signing_key_env),
            };
            run_build_command(&CashflowEngine::new(config), &options)
        }
        Commands::Verify {
            package,
            root,
            signing_key_env,
        } => run_verify_command(&package, &root, &signing_key_env),
        Commands::Config { action } => match action {
            ConfigAction::Default => {
                print!("{}", EngineConfig::default().to_json()?);
                println!();
                Ok(())
            }
            ConfigAction::Validate { path } => {
                EngineConfig::from_file(&path)?;
                println!("✅ {} is valid", path.display());
                Ok(())
            }
        },
    }
}

/// Key bytes from the named environment variable; unset or empty means unsigned
fn signing_key(var: &str) -> Option<Vec<u8>> {
    env::var(var)
        .ok()
        .filter(|k| !k.is_empty())
        .map(String::into_bytes)
}

fn run_build_command(engine: &CashflowEngine, options: &BuildOptions) -> Result<()> {
    println!("💧 Cash-flow risk build: {} → {}", options.bank_csv.display(), options.out_root.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let outcome = run_build(engine, options)?;

    println!("✓ Transactions classified: {}", outcome.transactions);
    println!("✓ Risk score: {}/100", outcome.risk_score_total);
    println!("✓ Anomalies flagged: {}", outcome.anomalies);
    println!("✓ Snapshot: {} (v{})", outcome.snapshot.versioned.display(), outcome.snapshot.version);
    println!("✓ Report: {}", outcome.report.latest.display());
    println!(
        "✓ Package: {} [{}]",
        outcome.package_path.display(),
        outcome
            .package
            .signature
            .as_ref()
            .map(|s| s.algorithm.as_str())
            .unwrap_or("unsigned")
    );
    if options.signing_key.is_none() {
        println!("⚠️  No signing key set; package carries a plain SHA-256 digest only");
    }
    println!("\n{}", outcome.package.commit_message);

    Ok(())
}

fn run_verify_command(package_path: &Path, root: &Path, key_env: &str) -> Result<()> {
    let package = PublishPackage::from_file(package_path)?;
    let key = signing_key(key_env);

    let artifacts = verify_package(&package, root, key.as_deref())
        .with_context(|| format!("Package {} failed verification", package_path.display()))?;

    for artifact in &artifacts {
        println!("{}\t{}\t{}", artifact.path, artifact.bytes, artifact.sha256);
    }
    println!("✅ Package {} verified", package.package_id);
    Ok(())
}
