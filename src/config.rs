//! Configuration loading and validation.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::blocklist::BlocklistFormat;
use crate::dns::MatchPolicy;
use crate::error::{ConfigError, Result, ValidationError};

/// Upper bound for the per-packet verdict deadline.
///
/// The kernel holds every queued packet until it gets a verdict, so the
/// deadline has to stay well below what a DNS client would notice.
pub const MAX_VERDICT_TIMEOUT_MS: u64 = 49;

/// Main configuration for the dnsgate filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// URL of the blocklist to download at startup.
    pub blocklist_url: String,

    /// Line grammar of the downloaded blocklist.
    #[serde(default)]
    pub blocklist_format: BlocklistFormat,

    /// How blocked names are handled.
    #[serde(default)]
    pub policy: MatchPolicy,

    /// Kernel queue settings.
    #[serde(default)]
    pub queue: QueueSettings,

    /// nftables settings.
    #[serde(default)]
    pub firewall: FirewallSettings,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Kernel delivery queue settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSettings {
    /// Netfilter queue number the rules redirect into.
    #[serde(default)]
    pub number: u16,

    /// Maximum number of packets the kernel holds for us before the bypass
    /// policy lets traffic through unfiltered.
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: u32,

    /// Number of payload bytes copied to user space per packet.
    #[serde(default = "default_max_packet_len")]
    pub max_packet_len: u32,

    /// Hard deadline for producing a verdict, in milliseconds.
    #[serde(default = "default_verdict_timeout_ms")]
    pub verdict_timeout_ms: u64,
}

impl QueueSettings {
    /// The verdict deadline as a [`Duration`].
    #[must_use]
    pub const fn verdict_timeout(&self) -> Duration {
        Duration::from_millis(self.verdict_timeout_ms)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            number: 0,
            max_queue_len: default_max_queue_len(),
            max_packet_len: default_max_packet_len(),
            verdict_timeout_ms: default_verdict_timeout_ms(),
        }
    }
}

/// nftables settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirewallSettings {
    /// Name of the `inet` table owned by dnsgate.
    #[serde(default = "default_table_name")]
    pub table: String,

    /// Path to the `nft` binary.
    #[serde(default = "default_nft_binary")]
    pub nft_binary: PathBuf,
}

impl Default for FirewallSettings {
    fn default() -> Self {
        Self {
            table: default_table_name(),
            nft_binary: default_nft_binary(),
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Serve `/metrics` over HTTP.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address of the exporter.
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

const fn default_max_queue_len() -> u32 {
    50
}

const fn default_max_packet_len() -> u32 {
    3000
}

const fn default_verdict_timeout_ms() -> u64 {
    15
}

fn default_table_name() -> String {
    "dnsgate".to_string()
}

fn default_nft_binary() -> PathBuf {
    PathBuf::from("nft")
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9153))
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let url = self.blocklist_url.trim();
        if url.is_empty() {
            return Err(ValidationError::EmptyBlocklistUrl);
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::InvalidBlocklistUrl {
                url: self.blocklist_url.clone(),
            });
        }

        if self.queue.max_queue_len == 0 {
            return Err(ValidationError::ZeroQueueLength);
        }

        if self.queue.max_packet_len == 0 || self.queue.max_packet_len > u32::from(u16::MAX) {
            return Err(ValidationError::InvalidPacketLength);
        }

        if self.queue.verdict_timeout_ms == 0
            || self.queue.verdict_timeout_ms > MAX_VERDICT_TIMEOUT_MS
        {
            return Err(ValidationError::InvalidVerdictTimeout {
                max: MAX_VERDICT_TIMEOUT_MS,
            });
        }

        let table = &self.firewall.table;
        if table.is_empty() {
            return Err(ValidationError::EmptyTableName);
        }
        // The name is interpolated into nft scripts.
        if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ValidationError::InvalidTableName {
                name: table.clone(),
            });
        }

        Ok(())
    }
}
