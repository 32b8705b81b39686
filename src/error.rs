//! Error types for the dnsgate filter.

use std::io;

use thiserror::Error;

use crate::blocklist::remote::LoadError;
use crate::firewall::FirewallError;
use crate::network::queue::QueueError;

/// Main error type for dnsgate operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("blocklist error: {0}")]
    Blocklist(#[from] LoadError),

    #[error("firewall error: {0}")]
    Firewall(#[from] FirewallError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("blocklist_url cannot be empty")]
    EmptyBlocklistUrl,

    #[error("blocklist_url must start with http:// or https://: {url:?}")]
    InvalidBlocklistUrl { url: String },

    #[error("queue.max_queue_len must be greater than 0")]
    ZeroQueueLength,

    #[error("queue.max_packet_len must be between 1 and 65535")]
    InvalidPacketLength,

    #[error("queue.verdict_timeout_ms must be between 1 and {max}")]
    InvalidVerdictTimeout { max: u64 },

    #[error("firewall.table cannot be empty")]
    EmptyTableName,

    #[error("firewall.table may only contain ASCII letters, digits and '_': {name:?}")]
    InvalidTableName { name: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
