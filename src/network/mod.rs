//! Kernel queue access and packet handling.

pub mod packet;
pub mod queue;
pub mod rewrite;

pub use packet::{InboundPacket, IpVersion, NetworkHeader, UdpDatagram};
pub use queue::{NfQueue, PacketQueue, QueueConfig, QueueError, QueuedPacket};
pub use rewrite::{RewriteError, reserialize};
