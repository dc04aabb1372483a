//! Autocrypt - Automatic Let's Encrypt certificates for Rancher load balancers
//!
//! Runs the reconciliation loop against the Cattle API of the environment
//! the container is deployed in.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use autocrypt::acme::{InstantAcmeDirectory, IssuanceClient, IssuanceSettings};
use autocrypt::reconcile::Reconciler;
use autocrypt::renewal::RenewalPolicy;
use autocrypt::shutdown::cancel_on_signal;
use autocrypt::storage::CertificateStore;
use autocrypt_config::Config;
use autocrypt_rancher::RancherClient;

/// Autocrypt - Automatic Let's Encrypt certificates for Rancher load balancers
#[derive(Parser, Debug)]
#[command(name = "autocrypt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run a single reconciliation cycle and exit
    #[arg(long = "once")]
    once: bool,

    /// Validate configuration from the environment and exit
    #[arg(long = "check-config")]
    check_config: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", env = "AUTOCRYPT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let config = Config::from_env().context("Failed to load configuration")?;

    if cli.check_config {
        info!("Configuration is valid");
        println!("{:#?}", config);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(run(config, cli.once))
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .init(),
    }
}

async fn run(config: Config, once: bool) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        cattle_url = %config.cattle_url,
        directory = %config.letsencrypt_directory_url,
        "Starting autocrypt"
    );

    let platform = RancherClient::new(
        config.cattle_url.clone(),
        &config.cattle_agent_instance_auth,
        config.eligibility_label.clone(),
        config.http_timeout(),
    )
    .context("Failed to create Cattle API client")?;

    let settings = IssuanceSettings::new(
        config.letsencrypt_contact_email.clone(),
        config.challenge_addr,
    )
    .with_validity(config.requested_validity());
    let issuer = IssuanceClient::new(
        InstantAcmeDirectory::new(config.letsencrypt_directory_url.clone()),
        settings,
    );

    let mut reconciler = Reconciler::new(platform, issuer)
        .with_policy(RenewalPolicy::from_days(config.renew_before_days))
        .with_interval(config.interval());

    match CertificateStore::new(&config.certificate_path) {
        Ok(store) => reconciler = reconciler.with_store(store),
        Err(e) => warn!(
            path = %config.certificate_path.display(),
            error = %e,
            "Certificate storage unavailable, certificates are only published to Rancher"
        ),
    }

    let cancel = CancellationToken::new();
    let signals = cancel_on_signal(cancel.clone());

    if once {
        let summary = reconciler.reconcile_once(&cancel).await;
        summary.log();
        signals.abort();

        let failed = summary.failed();
        if let Some(e) = summary.listing_error {
            return Err(e).context("Failed to list services");
        }
        if failed > 0 {
            bail!("{} service(s) failed to reconcile", failed);
        }
        return Ok(());
    }

    reconciler.run(cancel).await;
    signals.abort();

    info!("Autocrypt stopped");
    Ok(())
}
