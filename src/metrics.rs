//! Metrics initialization and filter counters.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::dns::Verdict;
use crate::error::{Error, Result};

pub const PACKETS_TOTAL: &str = "dnsgate_packets_total";
pub const DNS_DROPS_TOTAL: &str = "dnsgate_dns_drops_total";
pub const DNS_MODIFIED_TOTAL: &str = "dnsgate_dns_modified_total";
pub const MALFORMED_TOTAL: &str = "dnsgate_malformed_total";
pub const LATE_VERDICTS_TOTAL: &str = "dnsgate_late_verdicts_total";
pub const VERDICT_ERRORS_TOTAL: &str = "dnsgate_verdict_errors_total";
pub const RECV_ERRORS_TOTAL: &str = "dnsgate_recv_errors_total";

/// Initialize the metrics system based on configuration.
///
/// When metrics are enabled, this starts an HTTP server that exposes
/// a `/metrics` endpoint for Prometheus to scrape.
///
/// When metrics are disabled, this is a no-op. The `metrics` crate
/// handles unregistered metrics gracefully (they become no-ops).
///
/// # Errors
///
/// Returns [`Error::Metrics`] if the exporter cannot be installed.
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|err| Error::Metrics(err.to_string()))?;

    tracing::info!(listen = %config.listen, "metrics exporter started");
    Ok(())
}

/// Counters of the packet filter.
///
/// Every update is mirrored into the `metrics` facade; the atomics make the
/// values readable in-process for tests and shutdown logging.
#[derive(Debug, Default)]
pub struct FilterStats {
    received: AtomicU64,
    accepted: AtomicU64,
    dropped: AtomicU64,
    modified: AtomicU64,
    malformed: AtomicU64,
    late: AtomicU64,
    verdict_errors: AtomicU64,
    recv_errors: AtomicU64,
}

/// Point-in-time copy of [`FilterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub accepted: u64,
    pub dropped: u64,
    pub modified: u64,
    pub malformed: u64,
    pub late: u64,
    pub verdict_errors: u64,
    pub recv_errors: u64,
}

impl FilterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        counter!(PACKETS_TOTAL).increment(1);
    }

    /// Count the verdict that was handed back to the kernel.
    pub fn record_verdict(&self, verdict: &Verdict) {
        match verdict {
            Verdict::Accept => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Drop => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(DNS_DROPS_TOTAL).increment(1);
            }
            Verdict::AcceptModified(_) => {
                self.modified.fetch_add(1, Ordering::Relaxed);
                counter!(DNS_MODIFIED_TOTAL).increment(1);
            }
        }
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        counter!(MALFORMED_TOTAL).increment(1);
    }

    pub fn record_late(&self) {
        self.late.fetch_add(1, Ordering::Relaxed);
        counter!(LATE_VERDICTS_TOTAL).increment(1);
    }

    pub fn record_verdict_error(&self) {
        self.verdict_errors.fetch_add(1, Ordering::Relaxed);
        counter!(VERDICT_ERRORS_TOTAL).increment(1);
    }

    pub fn record_recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
        counter!(RECV_ERRORS_TOTAL).increment(1);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            modified: self.modified.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            verdict_errors: self.verdict_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}
