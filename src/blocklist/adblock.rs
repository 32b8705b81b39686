//! `AdBlock` filter syntax parser.
//!
//! Only the domain-anchored blocking rules that map onto a DNS name are
//! understood; everything else in a filter list is cosmetic or URL based and
//! is skipped.

use super::{BlocklistParser, normalize_domain};

/// Rule start anchor.
const DOMAIN_ANCHOR: &str = "||";
/// Separator terminating the domain part.
const SEPARATOR: &str = "^";
/// The only option accepted after the separator.
const THIRD_PARTY_OPTION: &str = "^$third-party";

/// Parser for `AdBlock` filter syntax.
///
/// # Supported Syntax
///
/// - `||domain.com^`
/// - `||domain.com^$third-party`
///
/// # Ignored
///
/// - Comments (`! ...`) and headers (`[Adblock Plus 2.0]`)
/// - Exception rules (`@@||domain^`)
/// - Rules with other options (`||domain^$script`)
/// - Element hiding rules (`##.ad-class`)
/// - URL pattern rules (`/ads/*`)
#[derive(Debug, Clone, Copy, Default)]
pub struct AdBlockParser;

impl BlocklistParser for AdBlockParser {
    fn parse_line(&self, line: &str) -> Option<String> {
        let rest = line.trim().strip_prefix(DOMAIN_ANCHOR)?;
        let domain = rest
            .strip_suffix(THIRD_PARTY_OPTION)
            .or_else(|| rest.strip_suffix(SEPARATOR))?;

        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return None;
        }
        Some(domain)
    }
}
