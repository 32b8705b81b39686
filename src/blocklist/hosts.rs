//! Hosts file format parser.
//!
//! Parses the null-routed entries of hosts-style blocklists like Steven
//! Black's unified hosts file.

use super::{BlocklistParser, normalize_domain};

/// Prefix of a null-routed hosts entry.
const NULL_ROUTE_PREFIX: &str = "0.0.0.0 ";

/// Parser for hosts file format.
///
/// # Extraction Rules
///
/// - The trimmed line must start with `0.0.0.0 ` (address plus one space)
/// - Everything after the prefix is the domain, normalized
/// - Any other line (comments, `127.0.0.1` entries, blank lines) is skipped
///
/// # Example
///
/// ```text
/// # Comment line
/// 127.0.0.1 localhost
/// 0.0.0.0 ads.example.com
/// 0.0.0.0 bad-site.org
/// ```
///
/// Only `ads.example.com` and `bad-site.org` are extracted.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostsFileParser;

impl BlocklistParser for HostsFileParser {
    fn parse_line(&self, line: &str) -> Option<String> {
        let rest = line.trim().strip_prefix(NULL_ROUTE_PREFIX)?;
        let domain = normalize_domain(rest);
        if domain.is_empty() {
            return None;
        }
        Some(domain)
    }
}
