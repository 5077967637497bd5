//! Environment-driven configuration for the notification service.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub timeout: Duration,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
}

#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
}

/// Tunables of the batch pipeline between the log and the sink.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub batch_size: usize,
    pub workers: usize,
    pub flush_interval: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    /// How long shutdown waits for workers to drain before force-dropping.
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub mongo: MongoConfig,
    pub kafka: KafkaSourceConfig,
    pub processing: ProcessingConfig,
    pub log_level: String,
}

impl NotifierConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            mongo: MongoConfig {
                uri: env_or("MONGO_URI", "mongodb://localhost:27017"),
                database: env_or("MONGO_DATABASE", "notification_db"),
                collection: env_or("MONGO_COLLECTION", "large_transfers"),
                timeout: env_secs("MONGO_TIMEOUT", 10)?,
                max_pool_size: env_parse("MONGO_MAX_POOL_SIZE", 100)?,
                min_pool_size: env_parse("MONGO_MIN_POOL_SIZE", 10)?,
            },
            kafka: KafkaSourceConfig {
                brokers: env_or("KAFKA_BROKERS", "localhost:9092"),
                topic: env_or("KAFKA_TOPIC", "large-transfers"),
                group_id: env_or("KAFKA_GROUP_ID", "notification-service-group"),
            },
            processing: ProcessingConfig {
                batch_size: env_parse("BATCH_SIZE", 100)?,
                workers: env_parse("WORKERS", 10)?,
                flush_interval: env_secs("FLUSH_INTERVAL", 5)?,
                retry_attempts: env_parse("RETRY_ATTEMPTS", 3)?,
                retry_delay: env_secs("RETRY_DELAY", 1)?,
                shutdown_grace: env_secs("SHUTDOWN_GRACE", 30)?,
            },
            log_level: env_or("LOG_LEVEL", "info"),
        })
    }
}

fn env_or(key: &'static str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(default),
    }
}

fn env_secs(key: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    env_parse(key, default_secs).map(Duration::from_secs)
}
