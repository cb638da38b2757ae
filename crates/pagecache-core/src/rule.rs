//! Cacheable URL rules.

use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Upper bound for ttl and grace, roughly a century.
const MAX_RULE_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// A cacheable URL prefix with its freshness policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRule {
    /// Prefix matched against the raw request path plus query string.
    pub url_prefix: String,
    /// Seconds a stored response is served as fresh.
    pub ttl_seconds: u64,
    /// Seconds past expiry during which the stale response may still be served.
    #[serde(default)]
    pub grace_seconds: u64,
}

impl CacheRule {
    pub fn new(url_prefix: impl Into<String>, ttl_seconds: u64, grace_seconds: u64) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            ttl_seconds,
            grace_seconds,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_seconds as i64)
    }

    pub fn grace(&self) -> Duration {
        Duration::seconds(self.grace_seconds as i64)
    }

    /// Relative lifetime of the stored entry: the freshness window plus the grace window.
    pub fn storage_seconds(&self) -> u64 {
        self.ttl_seconds.saturating_add(self.grace_seconds)
    }

    /// Check whether this rule applies to a path and query string.
    pub fn matches(&self, path_and_query: &str) -> bool {
        path_and_query.starts_with(&self.url_prefix)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidRule {
            prefix: self.url_prefix.clone(),
            reason: reason.to_string(),
        };

        if self.url_prefix.is_empty() {
            return Err(invalid("prefix must not be empty"));
        }
        if !self.url_prefix.starts_with('/') {
            return Err(invalid("prefix must start with '/'"));
        }
        if self.ttl_seconds == 0 {
            return Err(invalid("ttl_seconds must be greater than zero"));
        }
        if self.ttl_seconds > MAX_RULE_SECONDS || self.grace_seconds > MAX_RULE_SECONDS {
            return Err(invalid("ttl_seconds or grace_seconds out of range"));
        }
        Ok(())
    }
}

/// Ordered, immutable list of cache rules. The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CacheRule>,
}

impl RuleSet {
    /// Build a rule set, rejecting malformed rules before any request is served.
    pub fn new(rules: Vec<CacheRule>) -> Result<Self> {
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self { rules })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Return the first rule whose prefix matches, if any.
    pub fn match_path(&self, path_and_query: &str) -> Option<&CacheRule> {
        self.rules.iter().find(|rule| rule.matches(path_and_query))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
