//! Command implementations
//!
//! Each command writes its result to `out` and logs through `tracing`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Subcommand;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use certstore_core::{CancellationToken, CertificateStorage, LockState, Presence, Storage};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store a value under a key
    Put {
        key: String,
        /// Literal value; read from --file or stdin when absent
        value: Option<String>,
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
    },
    /// Print the value stored under a key
    Get {
        key: String,
        /// Write to a file instead of stdout
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Delete a key
    Rm { key: String },
    /// List keys starting with a prefix
    Ls {
        #[arg(default_value = "")]
        prefix: String,
        #[arg(short = 'r', long)]
        recursive: bool,
    },
    /// Show key metadata as JSON
    Stat { key: String },
    /// Report whether a key exists
    Exists { key: String },
    /// Distributed lock operations
    #[command(subcommand)]
    Lock(LockCommand),
    /// Check backend connectivity
    Health,
}

#[derive(Debug, Subcommand)]
pub enum LockCommand {
    /// Wait for the lock and leave it held
    Acquire { key: String },
    /// Single attempt; exits with an error when the key is held
    Try { key: String },
    /// Hold the lock for a while, then release it
    Hold {
        key: String,
        #[arg(long, default_value_t = 10)]
        secs: u64,
    },
    /// Release a lock held by this instance id
    Release { key: String },
    /// Show the current holder of a lock
    Status { key: String },
}

pub async fn run<W>(
    command: Command,
    storage: &CertificateStorage,
    cancel: &CancellationToken,
    out: &mut W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match command {
        Command::Put { key, value, file } => {
            let bytes = match (value, file) {
                (Some(value), _) => value.into_bytes(),
                (None, Some(path)) => tokio::fs::read(&path).await?,
                (None, None) => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
            };
            storage.store(&key, &bytes, cancel).await?;
            info!(key = %key, size = bytes.len(), "Stored");
        }
        Command::Get { key, output } => {
            let bytes = storage.load(&key, cancel).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &bytes).await?,
                None => out.write_all(&bytes).await?,
            }
        }
        Command::Rm { key } => {
            storage.delete(&key, cancel).await?;
            info!(key = %key, "Deleted");
        }
        Command::Ls { prefix, recursive } => {
            for key in storage.list(&prefix, recursive, cancel).await? {
                out.write_all(key.as_bytes()).await?;
                out.write_all(b"\n").await?;
            }
        }
        Command::Stat { key } => {
            let info = storage.stat(&key, cancel).await?;
            let json = serde_json::to_string_pretty(&info)?;
            out.write_all(json.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
        Command::Exists { key } => match storage.probe(&key, cancel).await {
            Presence::Present => out.write_all(b"true\n").await?,
            Presence::Absent => out.write_all(b"false\n").await?,
            Presence::Unknown => anyhow::bail!("could not determine whether '{key}' exists"),
        },
        Command::Lock(command) => run_lock(command, storage, cancel, out).await?,
        Command::Health => {
            storage.health_check().await?;
            out.write_all(b"ok\n").await?;
        }
    }
    out.flush().await?;
    Ok(())
}

async fn run_lock<W>(
    command: LockCommand,
    storage: &CertificateStorage,
    cancel: &CancellationToken,
    out: &mut W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match command {
        LockCommand::Acquire { key } => {
            storage.lock(&key, cancel).await?;
            let line = format!("locked {key} as {}\n", storage.instance_id());
            out.write_all(line.as_bytes()).await?;
        }
        LockCommand::Try { key } => {
            if !storage.try_lock(&key, cancel).await? {
                anyhow::bail!("'{key}' is locked by another holder");
            }
            let line = format!("locked {key} as {}\n", storage.instance_id());
            out.write_all(line.as_bytes()).await?;
        }
        LockCommand::Hold { key, secs } => {
            storage.lock(&key, cancel).await?;
            info!(key = %key, secs, "Holding lock");
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
            // Release even when interrupted
            storage.unlock(&key, &CancellationToken::new()).await?;
            out.write_all(format!("released {key}\n").as_bytes()).await?;
        }
        LockCommand::Release { key } => match storage.unlock(&key, cancel).await {
            Ok(()) => out.write_all(format!("released {key}\n").as_bytes()).await?,
            Err(e) if e.is_release_mismatch() => {
                warn!(key = %key, instance = %storage.instance_id(), "Nothing to release");
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        },
        LockCommand::Status { key } => {
            let line = match storage.lock_state(&key).await? {
                LockState::Unlocked => format!("{key}: unlocked\n"),
                LockState::Locked(lock) => {
                    let expiry = if lock.is_expired() {
                        " (expired, awaiting removal)"
                    } else {
                        ""
                    };
                    format!(
                        "{key}: locked by {} until {}{expiry}\n",
                        lock.instance,
                        lock.expires_at.to_rfc3339()
                    )
                }
            };
            out.write_all(line.as_bytes()).await?;
        }
    }
    Ok(())
}
