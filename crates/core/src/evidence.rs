//! Supporting facts gathered only for resources that are being diagnosed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a kind wants fetched before its diagnosis runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvidenceRequest {
    /// Label selector for the pods backing the resource.
    pub pod_selector: Option<String>,
    /// List persistent volume claims in the namespace.
    pub claims: bool,
    /// List warning events in the namespace.
    pub events: bool,
}

impl EvidenceRequest {
    pub fn events_only() -> Self { Self { pod_selector: None, claims: false, events: true } }

    pub fn is_empty(&self) -> bool { self.pod_selector.is_none() && !self.claims && !self.events }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    pub name: String,
    /// `Pending`, `Running`, `Succeeded`, `Failed` or `Unknown`.
    pub phase: String,
    pub ready: bool,
    /// Waiting or terminated reasons of containers, e.g. `CrashLoopBackOff`.
    #[serde(default)]
    pub container_reasons: Vec<String>,
    pub restarts: i32,
    /// Claim names mounted by the pod.
    #[serde(default)]
    pub claims: Vec<String>,
    /// Scheduling message when the pod is unschedulable.
    pub message: Option<String>,
}

impl PodSummary {
    pub fn is_running_and_ready(&self) -> bool { self.phase == "Running" && self.ready }

    pub fn failure_reason(&self) -> Option<&str> {
        const FAILING: [&str; 6] = [
            "CrashLoopBackOff",
            "ImagePullBackOff",
            "ErrImagePull",
            "CreateContainerConfigError",
            "InvalidImageName",
            "OOMKilled",
        ];
        if self.phase == "Failed" {
            return Some(self.container_reasons.first().map(String::as_str).unwrap_or("Failed"));
        }
        self.container_reasons.iter().map(String::as_str).find(|r| FAILING.contains(r))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSummary {
    pub name: String,
    /// `Pending`, `Bound` or `Lost`.
    pub phase: String,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub reason: String,
    /// `Kind/name` of the involved object.
    pub object: String,
    pub message: String,
    pub count: i32,
    pub last_seen: Option<DateTime<Utc>>,
}

impl EventSummary {
    pub fn object_name(&self) -> &str { self.object.rsplit('/').next().unwrap_or("") }
}

/// Everything fetched for one diagnosis. Empty fields mean "not requested or unavailable".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub pods: Vec<PodSummary>,
    pub claims: Vec<ClaimSummary>,
    pub events: Vec<EventSummary>,
}
