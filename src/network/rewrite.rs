//! Re-serialization of packets whose DNS payload was modified.
//!
//! The new DNS message rarely has the same size as the original (name
//! compression is re-done by the encoder), so the rewriter rebuilds the
//! packet around it and recomputes every length and checksum, bottom-up.

// Lengths are bounded by `u16::MAX` before any cast below.
#![allow(clippy::cast_possible_truncation)]

use std::net::{Ipv4Addr, Ipv6Addr};

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinEncodable;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::ipv6::MutableIpv6Packet;
use pnet::packet::udp::{self, MutableUdpPacket};

use super::packet::{InboundPacket, NetworkHeader, UDP_HEADER_SIZE};

/// Error type for packet re-serialization.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    /// The DNS message could not be encoded.
    #[error("failed to encode DNS message: {0}")]
    Serialize(String),

    /// The packet layout is not one we can rebuild.
    #[error("unsupported packet layout: {0}")]
    Unsupported(&'static str),

    /// The rebuilt packet does not fit the 16-bit length fields.
    #[error("rewritten packet too large: {0} bytes")]
    TooLarge(usize),
}

/// Rebuild `packet` with `message` as its UDP payload.
///
/// The network header (IPv4 options included) and the UDP ports are kept;
/// UDP length, UDP checksum over the matching pseudo-header, and the IPv4
/// total length and header checksum or the IPv6 payload length are
/// recomputed.
///
/// # Errors
///
/// Returns [`RewriteError`] when the message cannot be encoded or the
/// packet cannot be rebuilt. Callers must not forward the original bytes
/// with a modified payload in that case.
pub fn reserialize(packet: &InboundPacket<'_>, message: &Message) -> Result<Vec<u8>, RewriteError> {
    let datagram = packet
        .udp()
        .ok_or(RewriteError::Unsupported("not a UDP datagram"))?;
    let dns_bytes = message
        .to_bytes()
        .map_err(|err| RewriteError::Serialize(err.to_string()))?;

    let network_len = datagram.network.header_len();
    let udp_len = UDP_HEADER_SIZE + dns_bytes.len();
    let total_len = network_len + udp_len;

    let length_field = match datagram.network {
        NetworkHeader::V4 { .. } => total_len,
        NetworkHeader::V6 { .. } => udp_len,
    };
    if length_field > usize::from(u16::MAX) {
        return Err(RewriteError::TooLarge(total_len));
    }

    let original = packet.data();
    let mut buffer = Vec::with_capacity(total_len);
    buffer.extend_from_slice(&original[..network_len + UDP_HEADER_SIZE]);
    buffer.extend_from_slice(&dns_bytes);

    match datagram.network {
        NetworkHeader::V4 {
            source,
            destination,
            ..
        } => {
            finish_udp_v4(&mut buffer[network_len..], udp_len, source, destination)?;
            finish_ipv4(&mut buffer, total_len)?;
        }
        NetworkHeader::V6 {
            source,
            destination,
        } => {
            finish_udp_v6(&mut buffer[network_len..], udp_len, source, destination)?;
            finish_ipv6(&mut buffer, udp_len)?;
        }
    }

    Ok(buffer)
}

fn finish_udp_v4(
    segment: &mut [u8],
    udp_len: usize,
    source: Ipv4Addr,
    destination: Ipv4Addr,
) -> Result<(), RewriteError> {
    let mut udp = MutableUdpPacket::new(segment).ok_or(RewriteError::Unsupported("UDP header"))?;
    udp.set_length(udp_len as u16);
    udp.set_checksum(0);
    let checksum = udp::ipv4_checksum(&udp.to_immutable(), &source, &destination);
    udp.set_checksum(transmitted_checksum(checksum));
    Ok(())
}

fn finish_udp_v6(
    segment: &mut [u8],
    udp_len: usize,
    source: Ipv6Addr,
    destination: Ipv6Addr,
) -> Result<(), RewriteError> {
    let mut udp = MutableUdpPacket::new(segment).ok_or(RewriteError::Unsupported("UDP header"))?;
    udp.set_length(udp_len as u16);
    udp.set_checksum(0);
    let checksum = udp::ipv6_checksum(&udp.to_immutable(), &source, &destination);
    udp.set_checksum(transmitted_checksum(checksum));
    Ok(())
}

fn finish_ipv4(buffer: &mut [u8], total_len: usize) -> Result<(), RewriteError> {
    let mut ipv4 = MutableIpv4Packet::new(buffer).ok_or(RewriteError::Unsupported("IPv4 header"))?;
    ipv4.set_total_length(total_len as u16);
    ipv4.set_checksum(0);
    let checksum = ipv4::checksum(&ipv4.to_immutable());
    ipv4.set_checksum(checksum);
    Ok(())
}

fn finish_ipv6(buffer: &mut [u8], udp_len: usize) -> Result<(), RewriteError> {
    let mut ipv6 = MutableIpv6Packet::new(buffer).ok_or(RewriteError::Unsupported("IPv6 header"))?;
    ipv6.set_payload_length(udp_len as u16);
    Ok(())
}

/// A UDP checksum that computes to zero is sent as all ones (RFC 768);
/// zero on the wire means "no checksum", which IPv6 forbids.
const fn transmitted_checksum(checksum: u16) -> u16 {
    if checksum == 0 { 0xffff } else { checksum }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::packet::tests::{
        CLIENT_V4, CLIENT_V6, RESOLVER_V4, RESOLVER_V6, dns_response, ipv4_udp_packet,
        ipv6_udp_packet,
    };
    use crate::network::packet::{DNS_PORT, IPV4_MIN_HEADER_SIZE, IPV6_HEADER_SIZE};
    use hickory_proto::rr::RData;
    use hickory_proto::rr::rdata::A;
    use pnet::packet::Packet;
    use pnet::packet::ipv4::Ipv4Packet;
    use pnet::packet::ipv6::Ipv6Packet;
    use pnet::packet::udp::UdpPacket;

    fn zero_first_answer(message: &mut Message) {
        let mut answers = message.take_answers();
        answers[0].set_data(RData::A(A(Ipv4Addr::UNSPECIFIED)));
        message.insert_answers(answers);
    }

    fn assert_valid_ipv4(data: &[u8]) {
        let ip = Ipv4Packet::new(data).unwrap();
        assert_eq!(usize::from(ip.get_total_length()), data.len());
        assert_eq!(ip.get_checksum(), ipv4::checksum(&ip));

        let udp = UdpPacket::new(ip.payload()).unwrap();
        assert_eq!(usize::from(udp.get_length()), data.len() - IPV4_MIN_HEADER_SIZE);
        assert_eq!(
            udp.get_checksum(),
            udp::ipv4_checksum(&udp, &ip.get_source(), &ip.get_destination())
        );
    }

    #[test]
    fn should_rebuild_ipv4_packet_with_valid_checksums() {
        let mut message = dns_response("ads.example.com", 7);
        let original_dns = message.to_bytes().unwrap();
        let data = ipv4_udp_packet((RESOLVER_V4, DNS_PORT), (CLIENT_V4, 40000), &original_dns);
        let packet = InboundPacket::new(1, &data);

        zero_first_answer(&mut message);
        let rewritten = reserialize(&packet, &message).unwrap();

        assert_valid_ipv4(&rewritten);
        let reparsed = InboundPacket::new(1, &rewritten).dns_message().unwrap();
        assert_eq!(
            reparsed.answers()[0].data(),
            &RData::A(A(Ipv4Addr::UNSPECIFIED))
        );
        assert_eq!(reparsed.id(), 7);
    }

    #[test]
    fn should_keep_addresses_and_ports() {
        let message = dns_response("ads.example.com", 7);
        let dns = message.to_bytes().unwrap();
        let data = ipv4_udp_packet((RESOLVER_V4, DNS_PORT), (CLIENT_V4, 40000), &dns);

        let rewritten = reserialize(&InboundPacket::new(1, &data), &message).unwrap();
        let udp = InboundPacket::new(1, &rewritten).udp().unwrap();

        assert_eq!(udp.network.source(), std::net::IpAddr::V4(RESOLVER_V4));
        assert_eq!(udp.network.destination(), std::net::IpAddr::V4(CLIENT_V4));
        assert_eq!(udp.source_port, DNS_PORT);
        assert_eq!(udp.destination_port, 40000);
    }

    #[test]
    fn should_fix_lengths_when_payload_size_changes() {
        let message = dns_response("ads.example.com", 7);
        let dns = message.to_bytes().unwrap();
        // Trailing garbage inside the UDP payload makes the original longer.
        let mut padded = dns.clone();
        padded.extend_from_slice(&[0u8; 16]);
        let data = ipv4_udp_packet((RESOLVER_V4, DNS_PORT), (CLIENT_V4, 40000), &padded);

        let rewritten = reserialize(&InboundPacket::new(1, &data), &message).unwrap();

        assert_eq!(rewritten.len(), data.len() - 16);
        assert_valid_ipv4(&rewritten);
    }

    #[test]
    fn should_preserve_ipv4_options() {
        let message = dns_response("ads.example.com", 7);
        let dns = message.to_bytes().unwrap();
        let plain = ipv4_udp_packet((RESOLVER_V4, DNS_PORT), (CLIENT_V4, 40000), &dns);

        // Insert four bytes of NOP options into the header.
        let mut data = plain[..IPV4_MIN_HEADER_SIZE].to_vec();
        data.extend_from_slice(&[1, 1, 1, 1]);
        data.extend_from_slice(&plain[IPV4_MIN_HEADER_SIZE..]);
        {
            let mut ip = MutableIpv4Packet::new(&mut data).unwrap();
            ip.set_header_length(6);
            ip.set_total_length(u16::try_from(plain.len() + 4).unwrap());
        }

        let rewritten = reserialize(&InboundPacket::new(1, &data), &message).unwrap();

        assert_eq!(&rewritten[IPV4_MIN_HEADER_SIZE..IPV4_MIN_HEADER_SIZE + 4], &[1, 1, 1, 1]);
        let ip = Ipv4Packet::new(&rewritten).unwrap();
        assert_eq!(ip.get_header_length(), 6);
        assert_eq!(ip.get_checksum(), ipv4::checksum(&ip));
        let udp = UdpPacket::new(ip.payload()).unwrap();
        assert_eq!(
            udp.get_checksum(),
            udp::ipv4_checksum(&udp, &ip.get_source(), &ip.get_destination())
        );
    }

    #[test]
    fn should_rebuild_ipv6_packet_with_valid_checksum() {
        let mut message = dns_response("ads.example.com", 9);
        let dns = message.to_bytes().unwrap();
        let data = ipv6_udp_packet((RESOLVER_V6, DNS_PORT), (CLIENT_V6, 40000), &dns);

        zero_first_answer(&mut message);
        let rewritten = reserialize(&InboundPacket::new(1, &data), &message).unwrap();

        let ip = Ipv6Packet::new(&rewritten).unwrap();
        assert_eq!(
            usize::from(ip.get_payload_length()),
            rewritten.len() - IPV6_HEADER_SIZE
        );
        let udp = UdpPacket::new(&rewritten[IPV6_HEADER_SIZE..]).unwrap();
        assert_eq!(usize::from(udp.get_length()), rewritten.len() - IPV6_HEADER_SIZE);
        assert_eq!(
            udp.get_checksum(),
            udp::ipv6_checksum(&udp, &ip.get_source(), &ip.get_destination())
        );
    }

    #[test]
    fn should_refuse_non_udp_packets() {
        let message = dns_response("ads.example.com", 1);
        let result = reserialize(&InboundPacket::new(1, &[0x45, 0, 0]), &message);

        assert!(matches!(result, Err(RewriteError::Unsupported(_))));
    }

    #[test]
    fn should_refuse_oversized_messages() {
        let small = dns_response("ads.example.com", 3).to_bytes().unwrap();
        let data = ipv4_udp_packet((RESOLVER_V4, DNS_PORT), (CLIENT_V4, 40000), &small);

        let mut message = dns_response("ads.example.com", 3);
        let owner = message.answers()[0].name().clone();
        for i in 0..5000u32 {
            message.add_additional(hickory_proto::rr::Record::from_rdata(
                owner.clone(),
                60,
                RData::A(A(Ipv4Addr::from(i))),
            ));
        }

        assert!(reserialize(&InboundPacket::new(1, &data), &message).is_err());
    }

    #[test]
    fn should_send_zero_checksum_as_all_ones() {
        assert_eq!(transmitted_checksum(0), 0xffff);
        assert_eq!(transmitted_checksum(0x1234), 0x1234);
    }
}
