//! Lazy, zero-copy view over a queued packet.
//!
//! The kernel hands us raw IP packets (no link-layer header). Layers are
//! decoded only when asked for, and every view borrows the original payload.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinDecodable;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{Ipv4Flags, Ipv4Packet};
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::udp::UdpPacket;

/// Well-known DNS port.
pub const DNS_PORT: u16 = 53;
/// IPv4 header size in bytes (without options).
pub const IPV4_MIN_HEADER_SIZE: usize = 20;
/// IPv6 header size in bytes.
pub const IPV6_HEADER_SIZE: usize = 40;
/// UDP header size in bytes.
pub const UDP_HEADER_SIZE: usize = 8;

/// IP version, taken from the first nibble of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// Addressing of the network layer, as needed for the UDP pseudo-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkHeader {
    V4 {
        source: Ipv4Addr,
        destination: Ipv4Addr,
        /// Header length in bytes, options included.
        header_len: usize,
    },
    V6 {
        source: Ipv6Addr,
        destination: Ipv6Addr,
    },
}

impl NetworkHeader {
    /// Length of the network header in bytes.
    #[must_use]
    pub const fn header_len(&self) -> usize {
        match self {
            Self::V4 { header_len, .. } => *header_len,
            Self::V6 { .. } => IPV6_HEADER_SIZE,
        }
    }

    #[must_use]
    pub const fn source(&self) -> IpAddr {
        match self {
            Self::V4 { source, .. } => IpAddr::V4(*source),
            Self::V6 { source, .. } => IpAddr::V6(*source),
        }
    }

    #[must_use]
    pub const fn destination(&self) -> IpAddr {
        match self {
            Self::V4 { destination, .. } => IpAddr::V4(*destination),
            Self::V6 { destination, .. } => IpAddr::V6(*destination),
        }
    }
}

/// A decoded UDP datagram inside a queued packet.
#[derive(Debug, Clone, Copy)]
pub struct UdpDatagram<'a> {
    pub network: NetworkHeader,
    pub source_port: u16,
    pub destination_port: u16,
    /// The UDP payload, bounded by the UDP length field.
    pub payload: &'a [u8],
}

impl UdpDatagram<'_> {
    /// Whether either port is the DNS port.
    #[must_use]
    pub const fn is_dns(&self) -> bool {
        self.source_port == DNS_PORT || self.destination_port == DNS_PORT
    }
}

/// A packet received from the kernel queue.
///
/// Owned by the invocation that received it and never retained past it.
#[derive(Debug, Clone, Copy)]
pub struct InboundPacket<'a> {
    id: u32,
    data: &'a [u8],
}

impl<'a> InboundPacket<'a> {
    pub const fn new(id: u32, data: &'a [u8]) -> Self {
        Self { id, data }
    }

    /// Kernel packet identifier.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// The raw payload, starting at the network header.
    #[must_use]
    pub const fn data(&self) -> &'a [u8] {
        self.data
    }

    /// IP version from the first nibble, if it is 4 or 6.
    #[must_use]
    pub fn ip_version(&self) -> Option<IpVersion> {
        match self.data.first()? >> 4 {
            4 => Some(IpVersion::V4),
            6 => Some(IpVersion::V6),
            _ => None,
        }
    }

    /// Decode the network and transport layers.
    ///
    /// Returns `None` for anything that is not a complete, unfragmented UDP
    /// datagram directly behind the IP header.
    #[must_use]
    pub fn udp(&self) -> Option<UdpDatagram<'a>> {
        let (network, segment) = match self.ip_version()? {
            IpVersion::V4 => self.ipv4_segment()?,
            IpVersion::V6 => self.ipv6_segment()?,
        };

        let udp = UdpPacket::new(segment)?;
        let udp_len = usize::from(udp.get_length());
        if udp_len < UDP_HEADER_SIZE || udp_len > segment.len() {
            return None;
        }

        Some(UdpDatagram {
            network,
            source_port: udp.get_source(),
            destination_port: udp.get_destination(),
            payload: &segment[UDP_HEADER_SIZE..udp_len],
        })
    }

    /// The DNS message carried by the packet, if any.
    #[must_use]
    pub fn dns_message(&self) -> Option<Message> {
        let udp = self.udp().filter(UdpDatagram::is_dns)?;
        match Message::from_bytes(udp.payload) {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::debug!(packet_id = self.id, error = %err, "undecodable DNS payload");
                None
            }
        }
    }

    fn ipv4_segment(&self) -> Option<(NetworkHeader, &'a [u8])> {
        let ipv4 = Ipv4Packet::new(self.data)?;

        let header_len = usize::from(ipv4.get_header_length()) * 4;
        let total_len = usize::from(ipv4.get_total_length());
        if header_len < IPV4_MIN_HEADER_SIZE || total_len < header_len || total_len > self.data.len()
        {
            return None;
        }

        if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
            return None;
        }

        // Only the first fragment carries the UDP header, and even that one
        // cannot be rewritten without the rest of the datagram.
        if ipv4.get_flags() & Ipv4Flags::MoreFragments != 0 || ipv4.get_fragment_offset() != 0 {
            return None;
        }

        let network = NetworkHeader::V4 {
            source: ipv4.get_source(),
            destination: ipv4.get_destination(),
            header_len,
        };
        Some((network, &self.data[header_len..total_len]))
    }

    fn ipv6_segment(&self) -> Option<(NetworkHeader, &'a [u8])> {
        let ipv6 = Ipv6Packet::new(self.data)?;

        // Extension headers are not walked.
        if ipv6.get_next_header() != IpNextHeaderProtocols::Udp {
            return None;
        }

        let end = IPV6_HEADER_SIZE + usize::from(ipv6.get_payload_length());
        if end > self.data.len() {
            return None;
        }

        let network = NetworkHeader::V6 {
            source: ipv6.get_source(),
            destination: ipv6.get_destination(),
        };
        Some((network, &self.data[IPV6_HEADER_SIZE..end]))
    }
}
