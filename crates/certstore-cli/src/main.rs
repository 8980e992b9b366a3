//! certstore command line client

mod commands;
mod config;
mod logging;

use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, warn};

use certstore_core::{CancellationToken, CertificateStorage};
use certstore_persistence::{MemoryPersistService, StorageMode};

use crate::commands::Command;
use crate::config::{Configuration, DEFAULT_CONFIG_FILE, Overrides};

#[derive(Debug, Parser)]
#[command(name = "certstore", version, about = "Certificate storage with distributed locking")]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
    /// Storage backend: memory or mongo
    #[arg(short = 'b', long = "backend")]
    backend: Option<String>,
    #[arg(long = "mongo-uri", env = "CERTSTORE_MONGO_URI")]
    mongo_uri: Option<String>,
    #[arg(short = 'd', long = "database")]
    database: Option<String>,
    /// Holder identity for locks
    #[arg(short = 'i', long = "instance-id")]
    instance_id: Option<String>,
    #[arg(long = "log-level")]
    log_level: Option<String>,
    /// Print lock counters in Prometheus text format to stderr on exit
    #[arg(long = "print-metrics")]
    print_metrics: bool,
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            backend: self.backend.clone(),
            mongo_uri: self.mongo_uri.clone(),
            database: self.database.clone(),
            instance_id: self.instance_id.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

async fn open_storage(configuration: &Configuration) -> anyhow::Result<CertificateStorage> {
    let options = configuration.storage_options();
    let storage = match configuration.backend()? {
        StorageMode::Memory => {
            warn!("Memory backend state does not outlive this process");
            let persistence =
                MemoryPersistService::new().with_expiry_sweeper(configuration.sweep_interval());
            CertificateStorage::new(Arc::new(persistence), options).await?
        }
        #[cfg(feature = "mongo")]
        StorageMode::Mongo => {
            CertificateStorage::connect_mongo(&configuration.mongo_uri(), options).await?
        }
        #[cfg(not(feature = "mongo"))]
        StorageMode::Mongo => anyhow::bail!("certstore was built without the `mongo` feature"),
    };
    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = Configuration::load(&cli.config, &cli.overrides())?;
    let _logging_guard = logging::init_logging(&configuration.logging_config())?;
    let metrics = PrometheusBuilder::new().install_recorder()?;
    certstore_consistency::describe_metrics();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupt received");
                cancel.cancel();
            }
        });
    }

    let storage = open_storage(&configuration).await?;
    let mut stdout = tokio::io::stdout();
    let result = commands::run(cli.command, &storage, &cancel, &mut stdout).await;
    if cli.print_metrics {
        eprint!("{}", metrics.render());
    }
    result
}
