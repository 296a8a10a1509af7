//! Explicit per-session configuration. Nothing here reads ambient process state.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use keel_core::{Profile, ProfileParseError, RefParseError, ResourceRef};
use regex::Regex;
use serde::Serialize;

use crate::retry::RetryPolicy;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DIAGNOSED_PER_TICK: usize = 3;

/// Invalid user input; detected before any polling starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid duration {input:?}: {reason}")]
    Duration { input: String, reason: String },
    #[error("invalid ignore entry {0:?}: expected name or namespace/name of lowercase DNS-1123 labels")]
    Ignore(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error(transparent)]
    Profile(#[from] ProfileParseError),
    #[error(transparent)]
    Ref(#[from] RefParseError),
}

/// Parse `90`, `90s`, `5m` or `1h`.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let s = input.trim();
    let err = |reason: &str| ConfigError::Duration { input: input.to_string(), reason: reason.to_string() };
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() { return Err(err("expected a number")); }
    let n: u64 = digits.parse().map_err(|_| err("number out of range"))?;
    let secs = match unit {
        "" | "s" => n,
        "m" => n.saturating_mul(60),
        "h" => n.saturating_mul(3600),
        _ => return Err(err("unit must be s, m or h")),
    };
    Ok(Duration::from_secs(secs))
}

/// Render a duration the way [`parse_duration`] reads it.
pub fn format_duration(d: Duration) -> String {
    let s = d.as_secs();
    if s != 0 && s % 3600 == 0 {
        format!("{}h", s / 3600)
    } else if s != 0 && s % 60 == 0 {
        format!("{}m", s / 60)
    } else {
        format!("{}s", s)
    }
}

/// RFC 1123 subdomain: lowercase alphanumerics, `-` and `.`, alphanumeric at both ends.
fn is_dns1123(s: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").ok());
    s.len() <= 253 && re.as_ref().map(|re| re.is_match(s)).unwrap_or(false)
}

/// One allow-list entry: `name` matches in any namespace, `namespace/name` only there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IgnoreRule {
    pub namespace: Option<String>,
    pub name: String,
}

impl IgnoreRule {
    pub fn matches(&self, r: &ResourceRef) -> bool {
        self.name == r.name && self.namespace.as_deref().map(|ns| ns == r.namespace).unwrap_or(true)
    }
}

impl FromStr for IgnoreRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = |p: &&str| is_dns1123(p);
        match s.trim().split('/').collect::<Vec<_>>().as_slice() {
            [name] if valid(name) => Ok(Self { namespace: None, name: name.to_string() }),
            [ns, name] if valid(ns) && valid(name) => Ok(Self { namespace: Some(ns.to_string()), name: name.to_string() }),
            _ => Err(ConfigError::Ignore(s.to_string())),
        }
    }
}

impl fmt::Display for IgnoreRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Comma-separated ignore list; blank entries are skipped.
pub fn parse_ignore_list(input: &str) -> Result<Vec<IgnoreRule>, ConfigError> {
    input.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::parse::<IgnoreRule>).collect()
}

pub fn parse_profile(input: &str) -> Result<Profile, ConfigError> {
    Ok(input.parse::<Profile>()?)
}

/// Everything one `wait_for` call needs.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub timeout: Duration,
    pub interval: Duration,
    /// Always optional.
    pub ignore: Vec<IgnoreRule>,
    /// Optional only under a non-production profile.
    pub lenient: Vec<IgnoreRule>,
    pub profile: Profile,
    /// Non-healthy required refs diagnosed per progress tick.
    pub max_diagnosed_per_tick: usize,
    pub retry: RetryPolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            ignore: Vec::new(),
            lenient: Vec::new(),
            profile: Profile::default(),
            max_diagnosed_per_tick: DEFAULT_MAX_DIAGNOSED_PER_TICK,
            retry: RetryPolicy::default(),
        }
    }
}

impl PollConfig {
    pub fn new(timeout: Duration, interval: Duration) -> Self { Self { timeout, interval, ..Self::default() } }

    pub fn with_timeout(mut self, timeout: Duration) -> Self { self.timeout = timeout; self }
    pub fn with_interval(mut self, interval: Duration) -> Self { self.interval = interval; self }
    pub fn with_ignore(mut self, rules: Vec<IgnoreRule>) -> Self { self.ignore = rules; self }
    pub fn with_lenient(mut self, rules: Vec<IgnoreRule>) -> Self { self.lenient = rules; self }
    pub fn with_profile(mut self, profile: Profile) -> Self { self.profile = profile; self }
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self { self.retry = retry; self }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() { return Err(ConfigError::Zero("timeout")); }
        if self.interval.is_zero() { return Err(ConfigError::Zero("interval")); }
        Ok(())
    }

    /// Whether `r` can only produce warnings in this session.
    pub fn is_optional(&self, r: &ResourceRef) -> bool {
        r.optional
            || self.ignore.iter().any(|rule| rule.matches(r))
            || (self.profile.is_lenient() && self.lenient.iter().any(|rule| rule.matches(r)))
    }
}
