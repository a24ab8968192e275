//! ks-smoke: keystore end-to-end smoke test
//!
//! Usage:
//!   ks-smoke [--config /etc/keystore/keystore.toml] [--backend device|soft]
//!            [--seed user|device --key-spec aes128|aes256|ecc --algo aes_gcm|...]
//!
//! Without a case selection the default matrix runs: User/128/GCM,
//! Device/128/GCM and Device/256/GCM.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use ks_client::smoke::{self, SmokeCase};
use ks_client::{library_version, AlgoSpec, DeviceTransport, KeySpec, Keystore, SeedClass};
use ks_core::config::KeystoreConfig;
use ks_core::Transport;
use ks_soft::SoftBackend;

#[derive(Parser, Debug)]
#[command(name = "ks-smoke", version, about = "Keystore client smoke test")]
struct Cli {
    /// Path to keystore.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "KEYSTORE_CONFIG",
        default_value = "/etc/keystore/keystore.toml"
    )]
    config: PathBuf,

    /// Keystore device node (overrides [transport] device)
    #[arg(long, env = "KEYSTORE_DEVICE")]
    device: Option<PathBuf>,

    /// Backend to run against
    #[arg(long, default_value = "device")]
    backend: Backend,

    /// Seed class for a single case (default: [smoke] seed)
    #[arg(long)]
    seed: Option<SeedClass>,

    /// Key class for a single case (aes128, aes256, ecc)
    #[arg(long)]
    key_spec: Option<KeySpec>,

    /// Algorithm for a single case (aes_ccm, aes_gcm, ecies)
    #[arg(long)]
    algo: Option<AlgoSpec>,

    /// Log level (trace, debug, info, warn, error; default: [log] level)
    #[arg(long, env = "KEYSTORE_LOG")]
    log: Option<String>,

    /// Log format (default: [log] format)
    #[arg(long, env = "KEYSTORE_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum Backend {
    /// The keystore character device
    Device,
    /// In-process software keystore
    Soft,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = KeystoreConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None => LogFormat::from_str(&config.log.format, true)
            .map_err(|e| anyhow::anyhow!("[log] format: {e}"))?,
    };
    init_logging(&level, &format);

    info!(
        version = library_version(),
        backend = ?cli.backend,
        config = %cli.config.display(),
        "ks-smoke starting"
    );

    let cases = select_cases(&cli, &config);
    let failures = match cli.backend {
        Backend::Device => {
            let device = cli
                .device
                .clone()
                .unwrap_or_else(|| config.transport.device.clone());
            run_cases(&Keystore::new(DeviceTransport::new(device)), &cases)
        }
        Backend::Soft => run_cases(&Keystore::new(SoftBackend::new()), &cases),
    };

    if failures > 0 {
        anyhow::bail!("{failures} of {} smoke cases failed", cases.len());
    }
    Ok(())
}

/// One explicit case when any of seed/key-spec/algo is given, else the
/// default matrix.
fn select_cases(cli: &Cli, config: &KeystoreConfig) -> Vec<SmokeCase> {
    if cli.seed.is_none() && cli.key_spec.is_none() && cli.algo.is_none() {
        return smoke::default_matrix().to_vec();
    }
    vec![SmokeCase::new(
        cli.seed.unwrap_or(config.smoke.seed),
        cli.key_spec.unwrap_or(KeySpec::Raw128),
        cli.algo.unwrap_or(AlgoSpec::AesGcm),
    )]
}

fn run_cases<T: Transport>(ks: &Keystore<T>, cases: &[SmokeCase]) -> usize {
    match ks.api_version() {
        Ok(version) => info!(%version, compatible = version.is_compatible(), "keystore backend"),
        Err(e) => tracing::warn!(error = %e, "cannot query keystore API version"),
    }

    let mut failures = 0;
    for case in cases {
        match smoke::run_case(ks, *case) {
            Ok(()) => println!("{case}\tStatus: Pass"),
            Err(e) => {
                failures += 1;
                println!("{case}\tStatus: Fail ({e})");
            }
        }
    }
    failures
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
