//! The in-memory blocklist.

use std::collections::HashSet;

use super::normalize_domain;

/// A set of blocked domain names.
///
/// Names are normalized on insertion and on lookup, so membership is
/// insensitive to ASCII case, surrounding whitespace and a trailing dot.
/// Matching is exact: listing `ads.example.com` does not block
/// `cdn.ads.example.com`.
///
/// The set is built once and then only read; share it as
/// `Arc<DomainSet>` between packet handlers.
#[derive(Debug, Clone, Default)]
pub struct DomainSet {
    domains: HashSet<String>,
}

impl DomainSet {
    /// Build a set from a list of domain names.
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|domain| normalize_domain(domain.as_ref()))
            .filter(|domain| !domain.is_empty())
            .collect();
        Self { domains }
    }

    /// Check whether a name is blocked.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        let trimmed = name.trim();
        let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);

        // Names on the wire are almost always lowercase already.
        if trimmed.bytes().any(|b| b.is_ascii_uppercase()) {
            self.domains.contains(&trimmed.to_ascii_lowercase())
        } else {
            self.domains.contains(trimmed)
        }
    }

    /// Number of distinct domains.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Check if the set is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for DomainSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}
