//! Configuration management for the certstore CLI
//!
//! Sources, lowest precedence first: `conf/certstore.yml` (optional),
//! `CERTSTORE__*` environment variables, command line flags.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};

use certstore_common::{
    DEFAULT_DATABASE, DEFAULT_LOCK_RETRY_INTERVAL, DEFAULT_LOCK_TTL, StorageError, StorageResult,
};
use certstore_consistency::{LockOptions, RetryPolicy};
use certstore_core::StorageOptions;
use certstore_persistence::StorageMode;
use certstore_persistence::memory::DEFAULT_SWEEP_INTERVAL;

use crate::logging::LoggingConfig;

pub const BACKEND_PROPERTY: &str = "certstore.backend";
pub const MONGO_URI_PROPERTY: &str = "certstore.mongo.uri";
pub const DATABASE_PROPERTY: &str = "certstore.database";
pub const INSTANCE_ID_PROPERTY: &str = "certstore.instance_id";
pub const LOCK_TTL_PROPERTY: &str = "certstore.lock.ttl_secs";
pub const LOCK_RETRY_INTERVAL_PROPERTY: &str = "certstore.lock.retry_interval_ms";
pub const LOCK_RETRY_JITTER_PROPERTY: &str = "certstore.lock.retry_jitter_ms";
pub const SWEEP_INTERVAL_PROPERTY: &str = "certstore.memory.sweep_interval_ms";
pub const LOG_LEVEL_PROPERTY: &str = "certstore.log.level";
pub const LOG_FILE_PROPERTY: &str = "certstore.log.file";
pub const LOG_DIR_PROPERTY: &str = "certstore.log.dir";

pub const DEFAULT_CONFIG_FILE: &str = "conf/certstore.yml";
pub const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017";

/// Flag values that override file and environment settings
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub backend: Option<String>,
    pub mongo_uri: Option<String>,
    pub database: Option<String>,
    pub instance_id: Option<String>,
    pub log_level: Option<String>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn load(file: &str, overrides: &Overrides) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("CERTSTORE")
                    .prefix_separator("__")
                    .separator("__")
                    .keep_prefix(true)
                    .try_parsing(true),
            );

        let pairs = [
            (BACKEND_PROPERTY, &overrides.backend),
            (MONGO_URI_PROPERTY, &overrides.mongo_uri),
            (DATABASE_PROPERTY, &overrides.database),
            (INSTANCE_ID_PROPERTY, &overrides.instance_id),
            (LOG_LEVEL_PROPERTY, &overrides.log_level),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                builder = builder.set_override(key, value.as_str())?;
            }
        }

        Ok(Self {
            config: builder.build()?,
        })
    }

    pub fn backend(&self) -> StorageResult<StorageMode> {
        match self.config.get_string(BACKEND_PROPERTY) {
            Ok(value) => value
                .parse()
                .map_err(|e| StorageError::Config(format!("{BACKEND_PROPERTY}: {e}"))),
            Err(_) => Ok(StorageMode::Mongo),
        }
    }

    pub fn mongo_uri(&self) -> String {
        self.config
            .get_string(MONGO_URI_PROPERTY)
            .unwrap_or(DEFAULT_MONGO_URI.to_string())
    }

    pub fn database(&self) -> String {
        self.config
            .get_string(DATABASE_PROPERTY)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_DATABASE.to_string())
    }

    pub fn instance_id(&self) -> Option<String> {
        self.config
            .get_string(INSTANCE_ID_PROPERTY)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    pub fn lock_options(&self) -> LockOptions {
        let ttl = self
            .config
            .get_int(LOCK_TTL_PROPERTY)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LOCK_TTL);
        let retry = RetryPolicy::fixed(
            self.millis(LOCK_RETRY_INTERVAL_PROPERTY, DEFAULT_LOCK_RETRY_INTERVAL),
        )
        .with_jitter(self.millis(LOCK_RETRY_JITTER_PROPERTY, Duration::ZERO));

        LockOptions::default().with_ttl(ttl).with_retry(retry)
    }

    pub fn sweep_interval(&self) -> Duration {
        self.millis(SWEEP_INTERVAL_PROPERTY, DEFAULT_SWEEP_INTERVAL)
    }

    pub fn storage_options(&self) -> StorageOptions {
        let options = StorageOptions::default()
            .with_database(self.database())
            .with_lock(self.lock_options());
        match self.instance_id() {
            Some(id) => options.with_instance_id(id),
            None => options,
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        let log_dir = self
            .config
            .get_string(LOG_DIR_PROPERTY)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        LoggingConfig::from_config(
            log_dir,
            self.config.get_bool(LOG_FILE_PROPERTY).unwrap_or(false),
            self.config
                .get_string(LOG_LEVEL_PROPERTY)
                .unwrap_or("info".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn from_yaml(yaml: &str, overrides: &Overrides) -> Configuration {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        Configuration::load(file.path().to_str().unwrap(), overrides).unwrap()
    }

    #[test]
    fn test_defaults_without_file() {
        let config = Configuration::load("does/not/exist.yml", &Overrides::default()).unwrap();
        assert_eq!(config.database(), "certstore");
        assert_eq!(config.mongo_uri(), DEFAULT_MONGO_URI);
        assert_eq!(config.instance_id(), None);
        assert_eq!(config.lock_options(), LockOptions::default());
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_file_values() {
        let config = from_yaml(
            r#"
certstore:
  backend: memory
  database: acme
  instance_id: node-a
  lock:
    ttl_secs: 30
    retry_interval_ms: 500
    retry_jitter_ms: 100
"#,
            &Overrides::default(),
        );

        assert_eq!(config.backend().unwrap(), StorageMode::Memory);
        let options = config.storage_options();
        assert_eq!(options.database, "acme");
        assert_eq!(options.instance_id.as_deref(), Some("node-a"));
        assert_eq!(options.lock.ttl, Duration::from_secs(30));
        assert_eq!(options.lock.retry.interval, Duration::from_millis(500));
        assert_eq!(options.lock.retry.jitter, Duration::from_millis(100));
    }

    #[test]
    fn test_flags_override_file() {
        let overrides = Overrides {
            backend: Some("mongo".to_string()),
            instance_id: Some("node-b".to_string()),
            ..Default::default()
        };
        let config = from_yaml(
            "certstore:\n  backend: memory\n  instance_id: node-a\n",
            &overrides,
        );

        assert_eq!(config.backend().unwrap(), StorageMode::Mongo);
        assert_eq!(config.instance_id().as_deref(), Some("node-b"));
    }

    #[test]
    fn test_blank_instance_id_is_unset() {
        let config = from_yaml("certstore:\n  instance_id: \"\"\n", &Overrides::default());
        assert_eq!(config.instance_id(), None);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let overrides = Overrides {
            backend: Some("redis".to_string()),
            ..Default::default()
        };
        let config = Configuration::load("does/not/exist.yml", &overrides).unwrap();
        let err = config.backend().unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
        assert!(err.to_string().contains("redis"));
    }
}
