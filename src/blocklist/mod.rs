//! Blocklist loading and parsing.
//!
//! Two line grammars are understood:
//!
//! - **Hosts file**: `0.0.0.0 ads.example.com`, as published by Steven Black
//!   and friends
//! - **`AdBlock`**: `||ads.example.com^` and `||ads.example.com^$third-party`
//!
//! Every other line is skipped without error. Downloaded lists end up in a
//! [`DomainSet`], which is what the verdict engine consults per packet.
//!
//! # Example
//!
//! ```
//! use dnsgate::blocklist::{BlocklistFormat, parser_for_format};
//! use std::io::BufReader;
//!
//! let content = "# Comment\n0.0.0.0 ads.example.com\n||tracker.example.org^";
//! let parser = parser_for_format(BlocklistFormat::Auto);
//! let domains = parser.parse(&mut BufReader::new(content.as_bytes())).unwrap();
//! assert_eq!(domains, vec!["ads.example.com", "tracker.example.org"]);
//! ```

mod adblock;
mod hosts;
pub mod remote;
mod set;

use std::io::BufRead;

use serde::Deserialize;

pub use adblock::AdBlockParser;
pub use hosts::HostsFileParser;
pub use set::DomainSet;

/// Error type for blocklist parsing operations.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// I/O error during reading.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Line grammar of a blocklist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlocklistFormat {
    /// Accept both grammars, line by line.
    #[default]
    Auto,
    /// Only `0.0.0.0 <domain>` lines.
    Hosts,
    /// Only `||<domain>^` lines.
    Adblock,
}

/// Trait for blocklist parsers.
///
/// Each parser implementation handles a specific blocklist format and extracts
/// normalized domain names.
pub trait BlocklistParser: Send + Sync {
    /// Parse blocklist content and return the domains it names.
    ///
    /// Lines the grammar does not recognize produce nothing.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if reading fails.
    fn parse(&self, reader: &mut dyn BufRead) -> Result<Vec<String>, ParseError> {
        let mut domains = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line)?;
            if bytes_read == 0 {
                break;
            }

            if let Some(domain) = self.parse_line(&line) {
                domains.push(domain);
            }
        }

        Ok(domains)
    }

    /// Extract the domain from a single line, if the line matches.
    fn parse_line(&self, line: &str) -> Option<String>;
}

/// Parser accepting both the hosts and the `AdBlock` grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoParser;

impl BlocklistParser for AutoParser {
    fn parse_line(&self, line: &str) -> Option<String> {
        HostsFileParser
            .parse_line(line)
            .or_else(|| AdBlockParser.parse_line(line))
    }
}

/// Returns a boxed parser for the given blocklist format.
///
/// # Example
///
/// ```
/// use dnsgate::blocklist::{BlocklistFormat, parser_for_format};
/// use std::io::BufReader;
///
/// let parser = parser_for_format(BlocklistFormat::Hosts);
/// let content = "0.0.0.0 ads.example.com";
/// let domains = parser.parse(&mut BufReader::new(content.as_bytes())).unwrap();
/// assert_eq!(domains, vec!["ads.example.com"]);
/// ```
#[must_use]
pub fn parser_for_format(format: BlocklistFormat) -> Box<dyn BlocklistParser> {
    match format {
        BlocklistFormat::Auto => Box::new(AutoParser),
        BlocklistFormat::Hosts => Box::new(HostsFileParser),
        BlocklistFormat::Adblock => Box::new(AdBlockParser),
    }
}

/// Normalize a domain name for set membership.
///
/// Trims surrounding whitespace, lowercases ASCII letters and strips a single
/// trailing dot, so `Ads.Example.COM.` and `ads.example.com` compare equal.
#[must_use]
pub fn normalize_domain(name: &str) -> String {
    let trimmed = name.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    trimmed.to_ascii_lowercase()
}
