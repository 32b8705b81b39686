//! Filter orchestration.
//!
//! Ties the firewall rules, the blocklist and the kernel queue together and
//! runs the verdict loop until shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::blocklist::remote::{LoadError, RemoteLoader};
use crate::config::Config;
use crate::dns::{Verdict, VerdictEngine};
use crate::error::Result;
use crate::firewall::{FirewallRules, NftApplier, RuleApplier, RuleSet};
use crate::metrics::FilterStats;
use crate::network::{
    InboundPacket, NfQueue, PacketQueue, QueueConfig, QueueError, QueuedPacket,
};

/// Pause after a failed receive, typically `ENOBUFS` once the kernel
/// overflowed the socket buffer.
const RECV_BACKOFF: Duration = Duration::from_millis(10);

/// Decide the verdict for one notification.
///
/// Never fails: malformed notifications and decisions that overran
/// `verdict_timeout` (measured from `received_at`) are accepted.
pub fn handle_notification<M: QueuedPacket>(
    engine: &VerdictEngine,
    stats: &FilterStats,
    verdict_timeout: Duration,
    message: &M,
    received_at: Instant,
) -> Verdict {
    stats.record_received();

    let (id, payload) = match (message.packet_id(), message.payload()) {
        (Some(id), Some(payload)) => (id, payload),
        (id, _) => {
            let err = if id.is_none() {
                QueueError::Malformed("missing packet id")
            } else {
                QueueError::Malformed("missing payload")
            };
            warn!(packet_id = ?id, error = %err, "accepting malformed notification");
            stats.record_malformed();
            return Verdict::Accept;
        }
    };

    let verdict = engine.decide(&InboundPacket::new(id, payload));

    let elapsed = received_at.elapsed();
    if elapsed > verdict_timeout {
        warn!(
            packet_id = id,
            ?elapsed,
            verdict = verdict.label(),
            "verdict deadline exceeded, accepting"
        );
        stats.record_late();
        return Verdict::Accept;
    }

    debug!(packet_id = id, verdict = verdict.label(), "packet decided");
    verdict
}

/// Drain `queue` until `shutdown` flips to `true` or its sender is dropped.
///
/// Every received notification gets exactly one verdict, including the one
/// in flight when shutdown is requested.
///
/// # Errors
///
/// Returns [`QueueError::Broken`] once the queue handle is unusable.
/// Receive and verdict failures are logged and counted instead.
pub async fn run_queue<Q: PacketQueue>(
    queue: &mut Q,
    engine: &VerdictEngine,
    stats: &FilterStats,
    config: &QueueConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    if *shutdown.borrow_and_update() {
        return Ok(());
    }

    info!(queue = config.number, policy = ?engine.policy(), "queue loop started");

    loop {
        let received = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow_and_update() {
                    info!("shutdown requested, leaving queue loop");
                    return Ok(());
                }
                continue;
            }
            received = queue.recv() => received,
        };

        let message = match received {
            Ok(message) => message,
            Err(QueueError::Recv(err)) => {
                warn!(error = %err, "failed to receive from queue");
                stats.record_recv_error();
                tokio::time::sleep(RECV_BACKOFF).await;
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let verdict =
            handle_notification(engine, stats, config.verdict_timeout, &message, Instant::now());
        stats.record_verdict(&verdict);

        match queue.verdict(message, verdict) {
            Ok(()) => {}
            Err(err @ QueueError::Broken(_)) => return Err(err.into()),
            Err(err) => {
                warn!(error = %err, "failed to deliver verdict");
                stats.record_verdict_error();
            }
        }
    }
}

/// The DNS filter: rules, blocklist and queue loop.
pub struct DnsFilter<A> {
    config: Config,
    firewall: FirewallRules<A>,
    loader: RemoteLoader,
    stats: Arc<FilterStats>,
}

impl DnsFilter<NftApplier> {
    /// Build a filter applying its rules with the configured `nft` binary.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_config(config: Config) -> Result<Self> {
        let applier = NftApplier::new(config.firewall.nft_binary.clone());
        Self::new(config, applier)
    }

    /// Run against the netfilter queue until `shutdown` flips.
    ///
    /// # Errors
    ///
    /// See [`DnsFilter::run_with`].
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.run_with(NfQueue::open, shutdown).await
    }
}

impl<A: RuleApplier> DnsFilter<A> {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: Config, applier: A) -> Result<Self> {
        let rules = RuleSet::new(config.firewall.table.clone(), config.queue.number);
        let loader = RemoteLoader::new().map_err(LoadError::from)?;

        Ok(Self {
            config,
            firewall: FirewallRules::new(rules, applier),
            loader,
            stats: Arc::new(FilterStats::new()),
        })
    }

    pub fn stats(&self) -> Arc<FilterStats> {
        Arc::clone(&self.stats)
    }

    /// Install the rules, load the blocklist, open the queue with
    /// `open_queue` and run the loop until `shutdown` flips.
    ///
    /// The queue is closed before the rules are removed. The rules are
    /// removed on every exit path once installed.
    ///
    /// # Errors
    ///
    /// Returns the first startup failure (rules, blocklist, queue), or a
    /// fatal queue error from the loop.
    pub async fn run_with<Q, F>(&self, open_queue: F, shutdown: watch::Receiver<bool>) -> Result<()>
    where
        Q: PacketQueue,
        F: FnOnce(&QueueConfig) -> std::result::Result<Q, QueueError>,
    {
        self.firewall.install().await?;

        let result = self.serve(open_queue, shutdown).await;
        if let Err(err) = &result {
            warn!(error = %err, "filter stopped with an error");
        }

        self.firewall.teardown().await;
        result
    }

    async fn serve<Q, F>(&self, open_queue: F, shutdown: watch::Receiver<bool>) -> Result<()>
    where
        Q: PacketQueue,
        F: FnOnce(&QueueConfig) -> std::result::Result<Q, QueueError>,
    {
        let blocklist = self
            .loader
            .load(&self.config.blocklist_url, self.config.blocklist_format)
            .await?;
        let engine = VerdictEngine::new(Arc::new(blocklist), self.config.policy);

        let queue_config = QueueConfig::from(&self.config.queue);
        let mut queue = open_queue(&queue_config)?;

        let result = run_queue(&mut queue, &engine, &self.stats, &queue_config, shutdown).await;
        drop(queue);

        let stats = self.stats.snapshot();
        info!(
            received = stats.received,
            dropped = stats.dropped,
            modified = stats.modified,
            late = stats.late,
            "queue closed"
        );
        result
    }
}
