//! dnsgate - Network-wide DNS ad blocking at the netfilter queue boundary.
//!
//! dnsgate runs on a router. It installs nftables rules sending UDP port 53
//! traffic into a netfilter queue, downloads a blocklist once, and returns a
//! verdict for every queued packet: accept it, drop it, or accept a copy
//! whose blocked answers point at the unspecified address.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`]: Configuration loading and validation
//! - [`blocklist`]: Blocklist download and line grammars
//! - [`firewall`]: nftables rule lifecycle
//! - [`network`]: Kernel queue access, packet decoding and rewriting
//! - [`dns`]: Per-packet verdicts
//! - [`filter`]: Queue loop and startup/teardown ordering
//! - [`metrics`]: Prometheus exporter and counters
//! - [`error`]: Error types
//!
//! # Testing
//!
//! The kernel-facing pieces sit behind traits, so the whole pipeline can be
//! exercised without privileges:
//!
//! ```rust
//! use std::sync::Arc;
//! use dnsgate::blocklist::DomainSet;
//! use dnsgate::dns::{MatchPolicy, Verdict, VerdictEngine};
//! use dnsgate::network::InboundPacket;
//!
//! let engine = VerdictEngine::new(
//!     Arc::new(DomainSet::new(["ads.example.com"])),
//!     MatchPolicy::DropQuestion,
//! );
//! // Not an IP packet: accepted untouched.
//! assert_eq!(engine.decide(&InboundPacket::new(1, &[0x00])), Verdict::Accept);
//! ```

pub mod blocklist;
pub mod config;
pub mod dns;
pub mod error;
pub mod filter;
pub mod firewall;
pub mod metrics;
pub mod network;

pub use config::Config;
pub use error::{Error, Result};
pub use filter::DnsFilter;
