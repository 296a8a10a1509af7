use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical health of one resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Health {
    Healthy,
    Progressing,
    Degraded,
    Missing,
    Unknown,
}

impl Health {
    pub const ALL: [Health; 5] = [Health::Healthy, Health::Progressing, Health::Degraded, Health::Missing, Health::Unknown];

    pub fn is_healthy(self) -> bool { matches!(self, Health::Healthy) }

    pub fn as_str(self) -> &'static str {
        match self {
            Health::Healthy => "Healthy",
            Health::Progressing => "Progressing",
            Health::Degraded => "Degraded",
            Health::Missing => "Missing",
            Health::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum FindingCategory {
    /// A status condition that is not satisfied.
    Condition,
    /// A managed sub-resource reporting failure or lag.
    SubResource,
    Pod,
    StorageClaim,
    Event,
    /// Last operation of a declarative-sync engine.
    Operation,
    /// The snapshot itself could not be fetched or decoded.
    Fetch,
    /// Aggregate breakdown emitted when nothing more specific was found.
    Summary,
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FindingCategory::Condition => "condition",
            FindingCategory::SubResource => "sub-resource",
            FindingCategory::Pod => "pod",
            FindingCategory::StorageClaim => "claim",
            FindingCategory::Event => "event",
            FindingCategory::Operation => "operation",
            FindingCategory::Fetch => "fetch",
            FindingCategory::Summary => "summary",
        })
    }
}

/// One human-readable fact explaining why a resource is not healthy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiagnosticFinding {
    pub category: FindingCategory,
    pub subject: String,
    pub message: String,
    pub severity: Severity,
}

impl DiagnosticFinding {
    pub fn new(category: FindingCategory, subject: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self { category, subject: subject.into(), message: message.into(), severity }
    }
}

impl fmt::Display for DiagnosticFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}: {}", self.severity, self.category, self.subject, self.message)
    }
}

/// Derived judgement of a snapshot. Recomputed every tick, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub health: Health,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<DiagnosticFinding>,
}

impl Classification {
    pub fn new(health: Health, reason: Option<String>) -> Self { Self { health, reason, findings: Vec::new() } }

    pub fn healthy() -> Self { Self::new(Health::Healthy, None) }
    pub fn missing() -> Self { Self::new(Health::Missing, Some("object not found".to_string())) }
    pub fn progressing(reason: impl Into<String>) -> Self { Self::new(Health::Progressing, Some(reason.into())) }
    pub fn degraded(reason: impl Into<String>) -> Self { Self::new(Health::Degraded, Some(reason.into())) }
    pub fn unknown(reason: impl Into<String>) -> Self { Self::new(Health::Unknown, Some(reason.into())) }

    pub fn is_healthy(&self) -> bool { self.health.is_healthy() }

    pub fn with_findings(mut self, findings: Vec<DiagnosticFinding>) -> Self {
        self.findings = findings;
        self
    }
}
