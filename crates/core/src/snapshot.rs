use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Observed state of one resource at one point in time.
///
/// Decoded once at the client boundary; classifiers only ever see typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum StatusSnapshot {
    /// The object, or the CRD serving its kind, does not exist yet.
    Missing,
    Workload(WorkloadStatus),
    Sync(SyncStatus),
    Conditioned(ConditionedStatus),
    /// The document did not match the kind's schema.
    Malformed { reason: String },
}

impl StatusSnapshot {
    pub fn malformed(reason: impl Into<String>) -> Self { StatusSnapshot::Malformed { reason: reason.into() } }

    pub fn is_missing(&self) -> bool { matches!(self, StatusSnapshot::Missing) }

    pub fn conditions(&self) -> &[Condition] {
        match self {
            StatusSnapshot::Workload(w) => &w.conditions,
            StatusSnapshot::Sync(s) => &s.conditions,
            StatusSnapshot::Conditioned(c) => &c.conditions,
            StatusSnapshot::Missing | StatusSnapshot::Malformed { .. } => &[],
        }
    }
}

/// One entry of a `status.conditions` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    /// `True`, `False` or `Unknown`. Empty for engines that only list failures.
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(type_: &str, status: &str) -> Self {
        Self { type_: type_.to_string(), status: status.to_string(), reason: None, message: None }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn is_true(&self) -> bool { self.status == "True" }
    pub fn is_false(&self) -> bool { self.status == "False" }
}

/// Replica-count workloads (Deployment, StatefulSet, DaemonSet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    /// False until the workload controller has written `.status`.
    pub status_reported: bool,
    pub generation: Option<i64>,
    pub observed_generation: Option<i64>,
    pub desired: i32,
    pub ready: i32,
    pub updated: i32,
    pub available: i32,
    /// Label selector rendered as `k=v,k2=v2`.
    pub selector: Option<String>,
    /// StatefulSet volume claim template names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claim_templates: Vec<String>,
    #[serde(default)]
    pub conditions: SmallVec<[Condition; 4]>,
}

impl WorkloadStatus {
    pub fn generation_observed(&self) -> bool {
        match (self.generation, self.observed_generation) {
            (Some(g), Some(o)) => o >= g,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// Declarative-application state (Argo CD `Application`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub status_reported: bool,
    /// `Synced`, `OutOfSync` or `Unknown`.
    pub sync: Option<String>,
    /// `Healthy`, `Progressing`, `Degraded`, `Suspended`, `Missing` or `Unknown`.
    pub health: Option<String>,
    pub health_message: Option<String>,
    /// Phase of the last sync operation: `Running`, `Succeeded`, `Failed`, `Error`, `Terminating`.
    pub operation_phase: Option<String>,
    pub operation_message: Option<String>,
    #[serde(default)]
    pub resources: Vec<AppResource>,
    #[serde(default)]
    pub conditions: SmallVec<[Condition; 4]>,
}

/// One managed sub-resource of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppResource {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub sync: Option<String>,
    pub health: Option<String>,
    pub health_message: Option<String>,
}

impl AppResource {
    pub fn id(&self) -> String {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => format!("{}/{}/{}", self.kind, ns, self.name),
            _ => format!("{}/{}", self.kind, self.name),
        }
    }
}

/// Condition-list resources (ExternalSecret and arbitrary custom kinds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConditionedStatus {
    pub status_reported: bool,
    pub generation: Option<i64>,
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: SmallVec<[Condition; 4]>,
}

impl ConditionedStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn generation_observed(&self) -> bool {
        match (self.generation, self.observed_generation) {
            (Some(g), Some(o)) => o >= g,
            _ => true,
        }
    }
}
