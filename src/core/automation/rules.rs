//! Pattern-triggered responses

use crate::core::codec::hex_bytes;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// How a rule's pattern is compared with inbound bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Whole chunk equals the pattern
    Exact,
    /// Pattern occurs anywhere in the chunk
    #[default]
    Contains,
    /// Chunk begins with the pattern
    StartsWith,
    /// Chunk ends with the pattern
    EndsWith,
    /// Pattern is a regular expression over the raw bytes
    Regex,
}

impl std::str::FromStr for MatchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "exact" => Ok(Self::Exact),
            "contains" => Ok(Self::Contains),
            "starts_with" | "prefix" => Ok(Self::StartsWith),
            "ends_with" | "suffix" => Ok(Self::EndsWith),
            "regex" => Ok(Self::Regex),
            other => Err(format!("unknown match kind '{other}'")),
        }
    }
}

/// Pattern/response rule as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoResponseRule {
    /// Unique name
    pub name: String,
    /// Pattern bytes (the expression text for `Regex`)
    #[serde(with = "hex_bytes")]
    pub pattern: Vec<u8>,
    /// Comparison
    #[serde(default)]
    pub match_kind: MatchKind,
    /// Bytes sent when the rule matches
    #[serde(with = "hex_bytes")]
    pub response: Vec<u8>,
    /// Delay before the response is sent
    #[serde(default, rename = "delay_ms", with = "crate::core::transport::duration_ms")]
    pub delay: Duration,
    /// Whether the rule is evaluated
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl AutoResponseRule {
    /// Enabled rule with no delay
    pub fn new(name: &str, pattern: &[u8], match_kind: MatchKind, response: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_vec(),
            match_kind,
            response: response.to_vec(),
            delay: Duration::ZERO,
            enabled: true,
        }
    }

    /// Set the response delay
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the initial enabled flag
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Rule with its live counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSnapshot {
    /// Rule, with the current enabled flag
    pub rule: AutoResponseRule,
    /// Times the rule matched
    pub match_count: u64,
}

/// A rule held by the engine
#[derive(Debug)]
pub(crate) struct RuleEntry {
    pub(crate) rule: AutoResponseRule,
    enabled: AtomicBool,
    match_count: AtomicU64,
    regex: Option<Regex>,
}

impl RuleEntry {
    pub(crate) fn new(rule: AutoResponseRule) -> Self {
        let regex = match rule.match_kind {
            MatchKind::Regex => {
                let expr = String::from_utf8_lossy(&rule.pattern);
                match Regex::new(&expr) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(rule = %rule.name, error = %e, "Invalid rule pattern, rule will never match");
                        None
                    }
                }
            }
            _ => None,
        };

        Self {
            enabled: AtomicBool::new(rule.enabled),
            match_count: AtomicU64::new(0),
            regex,
            rule,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn reset_count(&self) {
        self.match_count.store(0, Ordering::SeqCst);
    }

    /// Test the chunk and count a hit
    pub(crate) fn try_match(&self, data: &[u8]) -> bool {
        if !self.is_enabled() || !self.matches(data) {
            return false;
        }
        self.match_count.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn matches(&self, data: &[u8]) -> bool {
        let pattern = self.rule.pattern.as_slice();
        match self.rule.match_kind {
            MatchKind::Exact => data == pattern,
            MatchKind::Contains => pattern.is_empty() || data.windows(pattern.len()).any(|w| w == pattern),
            MatchKind::StartsWith => data.starts_with(pattern),
            MatchKind::EndsWith => data.ends_with(pattern),
            MatchKind::Regex => self.regex.as_ref().is_some_and(|re| re.is_match(data)),
        }
    }

    pub(crate) fn snapshot(&self) -> RuleSnapshot {
        let mut rule = self.rule.clone();
        rule.enabled = self.is_enabled();
        RuleSnapshot {
            rule,
            match_count: self.match_count.load(Ordering::SeqCst),
        }
    }
}
