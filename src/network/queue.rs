//! Kernel packet queue abstraction.
//!
//! Provides a trait-based abstraction over the netfilter queue to enable:
//! - Testing the verdict loop without root privileges
//! - Swapping the queue backend

use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use nfq::Queue;
use tracing::info;

use crate::config::QueueSettings;
use crate::dns::Verdict;

/// Pause before reading an idle queue again.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Error type for kernel queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue could not be opened or configured.
    #[error("failed to open queue {number}: {source}")]
    Open {
        /// Queue number being opened.
        number: u16,
        #[source]
        source: io::Error,
    },

    /// Receiving the next notification failed. The queue stays usable.
    #[error("failed to receive from queue: {0}")]
    Recv(#[source] io::Error),

    /// The queue handle panicked mid-call and is no longer usable.
    #[error("kernel queue is no longer usable: {0}")]
    Broken(String),

    /// Returning a verdict to the kernel failed.
    #[error("failed to deliver verdict: {0}")]
    Verdict(#[source] io::Error),

    /// A notification was missing its packet id or payload.
    #[error("malformed notification: {0}")]
    Malformed(&'static str),
}

/// Kernel queue parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Netfilter queue number.
    pub number: u16,
    /// Kernel-side queue depth.
    pub max_queue_len: u32,
    /// Bytes of each packet copied to user space.
    pub max_packet_len: u16,
    /// Time budget for deciding one packet.
    pub verdict_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            number: 0,
            max_queue_len: 50,
            max_packet_len: 3000,
            verdict_timeout: Duration::from_millis(15),
        }
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            number: settings.number,
            max_queue_len: settings.max_queue_len,
            max_packet_len: u16::try_from(settings.max_packet_len).unwrap_or(u16::MAX),
            verdict_timeout: settings.verdict_timeout(),
        }
    }
}

/// A notification received from the queue.
pub trait QueuedPacket {
    /// Kernel-assigned packet id, if the notification carried one.
    fn packet_id(&self) -> Option<u32>;

    /// Raw network-layer payload, if the notification carried a non-empty one.
    fn payload(&self) -> Option<&[u8]>;
}

/// Trait for kernel queue implementations.
///
/// Every message returned by [`recv`](PacketQueue::recv) must be handed
/// back through [`verdict`](PacketQueue::verdict) exactly once.
pub trait PacketQueue {
    type Message: QueuedPacket;

    /// Wait for the next notification.
    ///
    /// Must be cancel-safe: dropping the future never loses a notification.
    /// [`QueueError::Broken`] means the queue must not be used again.
    fn recv(&mut self) -> impl Future<Output = Result<Self::Message, QueueError>>;

    /// Return the verdict for a received notification.
    fn verdict(&mut self, message: Self::Message, verdict: Verdict) -> Result<(), QueueError>;
}

/// Netfilter queue bound to one queue number.
///
/// `nfq` keeps its socket private, so reads are non-blocking and retried
/// every [`POLL_INTERVAL`] while the queue is idle. Non-blocking mode only
/// applies to reads: verdicts go out through a blocking `sendto`.
///
/// Dropping the handle closes the socket, which unbinds the queue.
pub struct NfQueue {
    queue: Queue,
}

impl NfQueue {
    /// Open and bind a netfilter queue.
    ///
    /// The queue copies up to `max_packet_len` bytes of each packet, holds
    /// at most `max_queue_len` packets and fails open: when it is full the
    /// kernel accepts new packets instead of dropping them.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Open`] if any step of the setup fails, typically
    /// because the process lacks `CAP_NET_ADMIN`.
    pub fn open(config: &QueueConfig) -> Result<Self, QueueError> {
        let number = config.number;
        let open_err = |source| QueueError::Open { number, source };

        let mut queue = Queue::open().map_err(open_err)?;
        queue.bind(number).map_err(open_err)?;
        queue
            .set_copy_range(number, config.max_packet_len)
            .map_err(open_err)?;
        queue
            .set_queue_max_len(number, config.max_queue_len)
            .map_err(open_err)?;
        queue.set_fail_open(number, true).map_err(open_err)?;
        queue.set_nonblocking(true);

        info!(
            queue = number,
            max_queue_len = config.max_queue_len,
            max_packet_len = config.max_packet_len,
            "kernel queue opened"
        );
        Ok(Self { queue })
    }
}

impl PacketQueue for NfQueue {
    type Message = nfq::Message;

    async fn recv(&mut self) -> Result<nfq::Message, QueueError> {
        // nfq buffers the rest of a multi-message read internally.
        poll_read(|| self.queue.recv(), POLL_INTERVAL).await
    }

    fn verdict(&mut self, mut message: nfq::Message, verdict: Verdict) -> Result<(), QueueError> {
        match verdict {
            Verdict::Accept => message.set_verdict(nfq::Verdict::Accept),
            Verdict::Drop => message.set_verdict(nfq::Verdict::Drop),
            Verdict::AcceptModified(payload) => {
                message.set_payload(payload);
                message.set_verdict(nfq::Verdict::Accept);
            }
        }
        guarded(|| self.queue.verdict(message))?.map_err(QueueError::Verdict)
    }
}

impl QueuedPacket for nfq::Message {
    // nfq asserts on notifications without a packet header while reading
    // them, so a received message always has an id. That assert surfaces
    // as `QueueError::Broken` through `guarded`.
    fn packet_id(&self) -> Option<u32> {
        Some(self.get_packet_id())
    }

    fn payload(&self) -> Option<&[u8]> {
        let payload = self.get_payload();
        (!payload.is_empty()).then_some(payload)
    }
}

/// Run one queue call, turning a panic into [`QueueError::Broken`].
fn guarded<T>(call: impl FnOnce() -> io::Result<T>) -> Result<io::Result<T>, QueueError> {
    panic::catch_unwind(AssertUnwindSafe(call)).map_err(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|reason| (*reason).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic without message".to_string());
        QueueError::Broken(reason)
    })
}

/// Retry a non-blocking `read` every `interval` until it stops reporting
/// `WouldBlock`.
///
/// Cancel-safe: nothing is in flight while sleeping.
async fn poll_read<T>(
    mut read: impl FnMut() -> io::Result<T>,
    interval: Duration,
) -> Result<T, QueueError> {
    loop {
        match guarded(&mut read)? {
            Ok(value) => return Ok(value),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                tokio::time::sleep(interval).await;
            }
            Err(err) => return Err(QueueError::Recv(err)),
        }
    }
}
