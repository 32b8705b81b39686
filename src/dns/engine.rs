//! Per-packet verdicts for queued DNS traffic.
//!
//! Matching is exact on normalized names: `ads.example.com` in the
//! blocklist does not cover `cdn.ads.example.com`.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use hickory_proto::op::Message;
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record};
use serde::Deserialize;
use tracing::{info, warn};

use crate::blocklist::DomainSet;
use crate::network::InboundPacket;
use crate::network::rewrite::{self, RewriteError};

/// The disposition returned to the kernel for one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Let the packet through unchanged.
    Accept,
    /// Discard the packet.
    Drop,
    /// Let the packet through with these bytes as its new payload.
    AcceptModified(Vec<u8>),
}

impl Verdict {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Drop => "drop",
            Self::AcceptModified(_) => "modified",
        }
    }
}

/// How a blocked name is acted upon.
///
/// Chosen once at configuration time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// Drop any DNS packet whose question names a blocked domain. Clients
    /// see a timeout.
    DropQuestion,
    /// Rewrite the addresses of blocked answer records to the unspecified
    /// address. Clients get an immediate, unusable answer.
    #[default]
    RedactAnswer,
}

/// Decides what happens to each queued packet.
#[derive(Debug, Clone)]
pub struct VerdictEngine {
    blocklist: Arc<DomainSet>,
    policy: MatchPolicy,
}

impl VerdictEngine {
    pub const fn new(blocklist: Arc<DomainSet>, policy: MatchPolicy) -> Self {
        Self { blocklist, policy }
    }

    #[must_use]
    pub const fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Decide the verdict for a packet.
    ///
    /// Anything that is not a decodable DNS message is accepted.
    #[must_use]
    pub fn decide(&self, packet: &InboundPacket<'_>) -> Verdict {
        let Some(message) = packet.dns_message() else {
            return Verdict::Accept;
        };

        match self.policy {
            MatchPolicy::DropQuestion => self.drop_question(packet, &message),
            MatchPolicy::RedactAnswer => self.redact_answer(packet, message),
        }
    }

    fn drop_question(&self, packet: &InboundPacket<'_>, message: &Message) -> Verdict {
        for query in message.queries() {
            let name = query.name().to_ascii();
            if self.blocklist.contains(&name) {
                info!(packet_id = packet.id(), domain = %name, "dropping blocked DNS question");
                return Verdict::Drop;
            }
        }
        Verdict::Accept
    }

    fn redact_answer(&self, packet: &InboundPacket<'_>, mut message: Message) -> Verdict {
        let mut answers = message.take_answers();
        let mut modified = false;

        for record in &mut answers {
            let name = record.name().to_ascii();
            if !self.blocklist.contains(&name) {
                continue;
            }
            if redact_address(record) {
                info!(packet_id = packet.id(), domain = %name, "redacted blocked DNS answer");
                modified = true;
            }
        }

        if !modified {
            return Verdict::Accept;
        }

        message.insert_answers(answers);
        rewritten_verdict(packet.id(), rewrite::reserialize(packet, &message))
    }
}

/// Verdict for a packet whose answers were redacted.
///
/// A failed rewrite drops the packet: forwarding the original would leak
/// the blocked address.
fn rewritten_verdict(packet_id: u32, rewritten: Result<Vec<u8>, RewriteError>) -> Verdict {
    match rewritten {
        Ok(bytes) => Verdict::AcceptModified(bytes),
        Err(err) => {
            warn!(packet_id, error = %err, "rewrite failed, dropping packet");
            Verdict::Drop
        }
    }
}

/// Point an address record at the unspecified address.
///
/// Returns `true` if the record changed.
fn redact_address(record: &mut Record) -> bool {
    let redacted = match record.data() {
        RData::A(A(addr)) if *addr != Ipv4Addr::UNSPECIFIED => RData::A(A(Ipv4Addr::UNSPECIFIED)),
        RData::AAAA(AAAA(addr)) if *addr != Ipv6Addr::UNSPECIFIED => {
            RData::AAAA(AAAA(Ipv6Addr::UNSPECIFIED))
        }
        _ => return false,
    };
    record.set_data(redacted);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::packet::tests::{
        CLIENT_V4, CLIENT_V6, RESOLVER_V4, RESOLVER_V6, dns_response, ipv4_dns_query,
        ipv4_dns_response, ipv4_udp_packet, ipv6_udp_packet,
    };
    use crate::network::packet::DNS_PORT;
    use hickory_proto::rr::Name;
    use hickory_proto::rr::rdata::CNAME;
    use hickory_proto::serialize::binary::BinEncodable;
    use pnet::packet::Packet;
    use pnet::packet::ipv4::{self, Ipv4Packet};
    use pnet::packet::udp::{self, UdpPacket};
    use std::str::FromStr;

    fn engine(policy: MatchPolicy) -> VerdictEngine {
        VerdictEngine::new(Arc::new(DomainSet::new(["ads.example.com"])), policy)
    }

    fn answer_addresses(data: &[u8]) -> Vec<RData> {
        InboundPacket::new(1, data)
            .dns_message()
            .unwrap()
            .answers()
            .iter()
            .map(|record| record.data().clone())
            .collect()
    }

    #[test]
    fn should_drop_blocked_question() {
        let data = ipv4_dns_query("ads.example.com");
        let verdict = engine(MatchPolicy::DropQuestion).decide(&InboundPacket::new(1, &data));

        assert_eq!(verdict, Verdict::Drop);
    }

    #[test]
    fn should_accept_allowed_question() {
        let data = ipv4_dns_query("shop.example.com");
        let verdict = engine(MatchPolicy::DropQuestion).decide(&InboundPacket::new(1, &data));

        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn should_match_question_case_insensitively() {
        let data = ipv4_dns_query("ADS.Example.com");
        let verdict = engine(MatchPolicy::DropQuestion).decide(&InboundPacket::new(1, &data));

        assert_eq!(verdict, Verdict::Drop);
    }

    #[test]
    fn should_not_drop_subdomains_of_blocked_names() {
        let data = ipv4_dns_query("cdn.ads.example.com");
        let verdict = engine(MatchPolicy::DropQuestion).decide(&InboundPacket::new(1, &data));

        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn should_accept_non_dns_traffic() {
        let data = ipv4_udp_packet((CLIENT_V4, 40000), (RESOLVER_V4, 443), b"quic");
        let verdict = engine(MatchPolicy::DropQuestion).decide(&InboundPacket::new(1, &data));

        assert_eq!(verdict, Verdict::Accept);
        assert_eq!(
            engine(MatchPolicy::RedactAnswer).decide(&InboundPacket::new(1, &[0x60])),
            Verdict::Accept
        );
    }

    #[test]
    fn should_redact_blocked_answers_with_valid_checksum() {
        let data = ipv4_dns_response("ads.example.com");
        let verdict = engine(MatchPolicy::RedactAnswer).decide(&InboundPacket::new(1, &data));

        let Verdict::AcceptModified(bytes) = verdict else {
            panic!("expected modified verdict, got {verdict:?}");
        };

        assert_eq!(
            answer_addresses(&bytes),
            vec![
                RData::A(A(Ipv4Addr::UNSPECIFIED)),
                RData::AAAA(AAAA(Ipv6Addr::UNSPECIFIED)),
            ]
        );

        let ip = Ipv4Packet::new(&bytes).unwrap();
        assert_eq!(ip.get_checksum(), ipv4::checksum(&ip));
        let segment = UdpPacket::new(ip.payload()).unwrap();
        assert_eq!(
            segment.get_checksum(),
            udp::ipv4_checksum(&segment, &ip.get_source(), &ip.get_destination())
        );
    }

    #[test]
    fn should_accept_unblocked_answers_untouched() {
        let data = ipv4_dns_response("shop.example.com");
        let verdict = engine(MatchPolicy::RedactAnswer).decide(&InboundPacket::new(1, &data));

        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn should_ignore_questions_under_redaction_policy() {
        let data = ipv4_dns_query("ads.example.com");
        let verdict = engine(MatchPolicy::RedactAnswer).decide(&InboundPacket::new(1, &data));

        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn should_redact_only_the_blocked_record_of_a_cname_chain() {
        let mut message = dns_response("www.shop.example.com", 5);
        let _ = message.take_answers();
        message.add_answer(Record::from_rdata(
            Name::from_str("www.shop.example.com.").unwrap(),
            60,
            RData::CNAME(CNAME(Name::from_str("ads.example.com.").unwrap())),
        ));
        message.add_answer(Record::from_rdata(
            Name::from_str("ads.example.com.").unwrap(),
            60,
            RData::A(A(Ipv4Addr::new(10, 1, 2, 3))),
        ));
        message.add_answer(Record::from_rdata(
            Name::from_str("other.example.net.").unwrap(),
            60,
            RData::A(A(Ipv4Addr::new(10, 4, 5, 6))),
        ));
        let dns = message.to_bytes().unwrap();
        let data = ipv4_udp_packet((RESOLVER_V4, DNS_PORT), (CLIENT_V4, 40000), &dns);

        let verdict = engine(MatchPolicy::RedactAnswer).decide(&InboundPacket::new(1, &data));
        let Verdict::AcceptModified(bytes) = verdict else {
            panic!("expected modified verdict, got {verdict:?}");
        };

        let answers = answer_addresses(&bytes);
        assert!(matches!(answers[0], RData::CNAME(_)));
        assert_eq!(answers[1], RData::A(A(Ipv4Addr::UNSPECIFIED)));
        assert_eq!(answers[2], RData::A(A(Ipv4Addr::new(10, 4, 5, 6))));
    }

    #[test]
    fn should_accept_already_redacted_answers() {
        let mut message = dns_response("ads.example.com", 5);
        let _ = message.take_answers();
        message.add_answer(Record::from_rdata(
            Name::from_str("ads.example.com.").unwrap(),
            60,
            RData::A(A(Ipv4Addr::UNSPECIFIED)),
        ));
        let dns = message.to_bytes().unwrap();
        let data = ipv4_udp_packet((RESOLVER_V4, DNS_PORT), (CLIENT_V4, 40000), &dns);

        let verdict = engine(MatchPolicy::RedactAnswer).decide(&InboundPacket::new(1, &data));

        assert_eq!(verdict, Verdict::Accept);
    }

    #[test]
    fn should_redact_ipv6_transported_answers() {
        let dns = dns_response("ads.example.com", 3).to_bytes().unwrap();
        let data = ipv6_udp_packet((RESOLVER_V6, DNS_PORT), (CLIENT_V6, 40000), &dns);

        let verdict = engine(MatchPolicy::RedactAnswer).decide(&InboundPacket::new(1, &data));

        let Verdict::AcceptModified(bytes) = verdict else {
            panic!("expected modified verdict, got {verdict:?}");
        };
        assert_eq!(answer_addresses(&bytes)[0], RData::A(A(Ipv4Addr::UNSPECIFIED)));
    }

    #[test]
    fn should_drop_when_rewrite_fails() {
        let message = dns_response("ads.example.com", 12);
        let truncated = [0x45, 0, 0];
        let rewritten = rewrite::reserialize(&InboundPacket::new(5, &truncated), &message);
        assert!(rewritten.is_err());

        assert_eq!(rewritten_verdict(5, rewritten), Verdict::Drop);
        assert_eq!(
            rewritten_verdict(5, Err(RewriteError::TooLarge(70_000))),
            Verdict::Drop
        );
    }

    #[test]
    fn should_forward_successful_rewrite() {
        assert_eq!(
            rewritten_verdict(5, Ok(vec![0x45, 0x00])),
            Verdict::AcceptModified(vec![0x45, 0x00])
        );
    }

    #[test]
    fn should_deserialize_policy_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: MatchPolicy,
        }

        let parsed: Wrapper = toml::from_str(r#"policy = "drop-question""#).unwrap();
        assert_eq!(parsed.policy, MatchPolicy::DropQuestion);
        let parsed: Wrapper = toml::from_str(r#"policy = "redact-answer""#).unwrap();
        assert_eq!(parsed.policy, MatchPolicy::RedactAnswer);
    }

    #[test]
    fn should_label_verdicts() {
        assert_eq!(Verdict::Accept.label(), "accept");
        assert_eq!(Verdict::Drop.label(), "drop");
        assert_eq!(Verdict::AcceptModified(Vec::new()).label(), "modified");
    }
}
