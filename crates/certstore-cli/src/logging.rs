//! Console and file logging
//!
//! Console output goes to stderr so command output on stdout stays clean.
//! When file logging is enabled, events are also written to daily rolling
//! files:
//!
//! | Log File      | Component                 | Target Prefixes                        |
//! |---------------|---------------------------|----------------------------------------|
//! | certstore.log | Root logger (all events)  | (all)                                  |
//! | lock.log      | Distributed lock manager  | certstore_consistency                  |
//! | storage.log   | Records and backends      | certstore_core, certstore_persistence  |

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub const ROOT_LOG_FILE: &str = "certstore.log";

struct ComponentLogDef {
    file_name: &'static str,
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "lock.log",
        targets: &["certstore_consistency"],
    },
    ComponentLogDef {
        file_name: "storage.log",
        targets: &["certstore_core", "certstore_persistence"],
    },
];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base log directory (default: `~/certstore/logs`)
    pub log_dir: PathBuf,
    pub level: Level,
    pub file_logging: bool,
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/certstore/logs", home))
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            level: Level::INFO,
            file_logging: false,
        }
    }
}

impl LoggingConfig {
    pub fn from_config(log_dir: Option<PathBuf>, file_logging: bool, level: String) -> Self {
        Self {
            log_dir: log_dir.unwrap_or_else(default_log_dir),
            level: level.parse().unwrap_or(Level::INFO),
            file_logging,
        }
    }
}

/// Keeps the non-blocking file writers alive; dropping it flushes them
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the configured level for the console and
/// the root file. Component files capture every event from their targets.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
    layers.push(Box::new(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(console_filter),
    ));

    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;

        let root_appender =
            RollingFileAppender::new(Rotation::DAILY, &config.log_dir, ROOT_LOG_FILE);
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
        layers.push(Box::new(
            fmt::layer()
                .with_writer(root_nb)
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(false)
                .with_filter(root_filter),
        ));

        for component in COMPONENT_LOGS {
            let appender =
                RollingFileAppender::new(Rotation::DAILY, &config.log_dir, component.file_name);
            let (nb, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, LevelFilter::TRACE);
            }

            layers.push(Box::new(
                fmt::layer()
                    .with_writer(nb)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_ansi(false)
                    .with_filter(targets),
            ));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    if config.file_logging {
        tracing::debug!(
            log_dir = %config.log_dir.display(),
            component_files = COMPONENT_LOGS.len(),
            "File logging initialized"
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}
