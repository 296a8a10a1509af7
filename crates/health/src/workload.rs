//! Replica-set style workloads: Deployment, StatefulSet, DaemonSet.

use std::collections::BTreeMap;

use keel_core::{
    Classification, DiagnosticFinding, Evidence, EvidenceRequest, FindingCategory, Health, PodSummary, ResourceRef,
    Severity, StatusSnapshot, WorkloadStatus,
};

use crate::diagnostics::{severity_for, unsatisfied_conditions};
use crate::KindStrategy;

/// Not-ready pods listed per diagnosis; the breakdown covers the rest.
const MAX_PODS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct WorkloadStrategy {
    /// Require `available == desired` (StatefulSets only report ready replicas reliably).
    check_available: bool,
    /// Condition type that must not be `False` once converged.
    required_condition: Option<&'static str>,
}

impl WorkloadStrategy {
    pub fn deployment() -> Self { Self { check_available: true, required_condition: Some("Available") } }
    pub fn statefulset() -> Self { Self { check_available: false, required_condition: None } }
    pub fn daemonset() -> Self { Self { check_available: true, required_condition: None } }
}

fn workload(snapshot: &StatusSnapshot) -> Option<&WorkloadStatus> {
    match snapshot {
        StatusSnapshot::Workload(w) => Some(w),
        _ => None,
    }
}

fn failing_condition(w: &WorkloadStatus) -> Option<String> {
    if let Some(c) = w.condition("Progressing") {
        if c.reason.as_deref() == Some("ProgressDeadlineExceeded") {
            return Some(c.message.clone().unwrap_or_else(|| "progress deadline exceeded".to_string()));
        }
    }
    w.condition("ReplicaFailure")
        .filter(|c| c.is_true())
        .map(|c| format!("replica failure: {}", c.message.as_deref().or(c.reason.as_deref()).unwrap_or("unspecified")))
}

fn pod_line(p: &PodSummary) -> String {
    let mut s = format!("phase {}", p.phase);
    if !p.ready && p.phase == "Running" { s.push_str(", not ready"); }
    if !p.container_reasons.is_empty() { s.push_str(&format!(", {}", p.container_reasons.join(", "))); }
    if p.restarts > 0 { s.push_str(&format!(", {} restarts", p.restarts)); }
    if let Some(m) = p.message.as_deref() { s.push_str(&format!(": {}", m)); }
    s
}

impl KindStrategy for WorkloadStrategy {
    fn classify(&self, snapshot: &StatusSnapshot) -> Classification {
        let Some(w) = workload(snapshot) else {
            return Classification::unknown("unexpected status shape for workload");
        };
        if !w.status_reported { return Classification::unknown("controller has not reported status"); }
        if let Some(reason) = failing_condition(w) { return Classification::degraded(reason); }
        if !w.generation_observed() {
            return Classification::progressing(format!(
                "observed generation {} behind {}",
                w.observed_generation.map(|g| g.to_string()).unwrap_or_else(|| "none".into()),
                w.generation.unwrap_or_default()
            ));
        }
        let d = w.desired;
        if w.ready < d { return Classification::progressing(format!("ready {}/{}", w.ready, d)); }
        if w.updated < d { return Classification::progressing(format!("updated {}/{}", w.updated, d)); }
        if self.check_available && w.available < d {
            return Classification::progressing(format!("available {}/{}", w.available, d));
        }
        if let Some(c) = self.required_condition.and_then(|t| w.condition(t)).filter(|c| c.is_false()) {
            return Classification::progressing(format!("{} condition is False", c.type_));
        }
        Classification::healthy()
    }

    fn evidence(&self, snapshot: &StatusSnapshot) -> EvidenceRequest {
        let Some(w) = workload(snapshot) else { return EvidenceRequest::events_only() };
        EvidenceRequest { pod_selector: w.selector.clone(), claims: true, events: true }
    }

    fn diagnose(
        &self,
        reference: &ResourceRef,
        snapshot: &StatusSnapshot,
        classification: &Classification,
        evidence: &Evidence,
    ) -> Vec<DiagnosticFinding> {
        let severity = severity_for(classification);
        let mut out = unsatisfied_conditions(snapshot.conditions(), &["ReplicaFailure"], severity);

        for p in evidence.pods.iter().filter(|p| p.failure_reason().is_some()) {
            let reason = p.failure_reason().unwrap_or("Failed");
            out.push(DiagnosticFinding::new(FindingCategory::Pod, p.name.clone(), format!("{}; {}", reason, pod_line(p)), Severity::Error));
        }

        if classification.health == Health::Progressing {
            let pending_pods = evidence
                .pods
                .iter()
                .filter(|p| p.failure_reason().is_none() && !p.is_running_and_ready() && p.phase != "Succeeded");
            for p in pending_pods.take(MAX_PODS) {
                out.push(DiagnosticFinding::new(FindingCategory::Pod, p.name.clone(), pod_line(p), Severity::Warning));
            }

            let templates: Vec<String> = workload(snapshot)
                .map(|w| w.claim_templates.iter().map(|t| format!("{}-{}-", t, reference.name)).collect())
                .unwrap_or_default();
            let claimed = |name: &str| {
                evidence.pods.iter().any(|p| p.claims.iter().any(|c| c == name))
                    || templates.iter().any(|t| name.starts_with(t.as_str()))
            };
            for c in evidence.claims.iter().filter(|c| c.phase == "Pending" && claimed(&c.name)) {
                let class = c.storage_class.as_deref().unwrap_or("default");
                out.push(DiagnosticFinding::new(
                    FindingCategory::StorageClaim,
                    c.name.clone(),
                    format!("claim Pending (storage class {})", class),
                    Severity::Warning,
                ));
            }
        }
        out
    }

    fn breakdown(&self, snapshot: &StatusSnapshot, evidence: &Evidence) -> String {
        let Some(w) = workload(snapshot) else { return String::new() };
        let d = w.desired;
        let mut s = format!("ready {}/{}, updated {}/{}, available {}/{}", w.ready, d, w.updated, d, w.available, d);
        if !evidence.pods.is_empty() {
            let mut phases: BTreeMap<&str, usize> = BTreeMap::new();
            for p in &evidence.pods {
                *phases.entry(p.phase.as_str()).or_default() += 1;
            }
            let parts: Vec<String> = phases.iter().map(|(phase, n)| format!("{} {}", n, phase)).collect();
            s.push_str(&format!("; pods: {}", parts.join(", ")));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{ClaimSummary, Condition, ResourceKind};
    use smallvec::smallvec;

    fn snap(desired: i32, ready: i32) -> StatusSnapshot {
        StatusSnapshot::Workload(WorkloadStatus {
            status_reported: true,
            generation: Some(2),
            observed_generation: Some(2),
            desired,
            ready,
            updated: ready,
            available: ready,
            selector: Some("app=db".into()),
            claim_templates: vec!["data".into()],
            conditions: smallvec![],
        })
    }

    #[test]
    fn progressing_reason_names_counts() {
        let c = WorkloadStrategy::deployment().classify(&snap(3, 1));
        assert_eq!(c.health, Health::Progressing);
        assert_eq!(c.reason.as_deref(), Some("ready 1/3"));
    }

    #[test]
    fn required_condition_false_keeps_deployment_progressing() {
        let mut s = snap(2, 2);
        if let StatusSnapshot::Workload(w) = &mut s {
            w.conditions.push(Condition::new("Available", "False").with_reason("MinimumReplicasUnavailable"));
        }
        assert_eq!(WorkloadStrategy::deployment().classify(&s).health, Health::Progressing);
        assert_eq!(WorkloadStrategy::daemonset().classify(&s).health, Health::Healthy);
    }

    #[test]
    fn pending_template_claims_are_reported() {
        let r = ResourceRef::new(ResourceKind::StatefulSet, "db", "pg");
        let ev = Evidence {
            pods: vec![PodSummary { name: "pg-0".into(), phase: "Pending".into(), ..Default::default() }],
            claims: vec![
                ClaimSummary { name: "data-pg-0".into(), phase: "Pending".into(), storage_class: Some("fast".into()) },
                ClaimSummary { name: "other".into(), phase: "Pending".into(), storage_class: None },
            ],
            events: vec![],
        };
        let s = snap(1, 0);
        let strat = WorkloadStrategy::statefulset();
        let cls = strat.classify(&s);
        let f = strat.diagnose(&r, &s, &cls, &ev);
        assert!(f.iter().any(|f| f.category == FindingCategory::Pod && f.subject == "pg-0"));
        let claims: Vec<_> = f.iter().filter(|f| f.category == FindingCategory::StorageClaim).collect();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].subject, "data-pg-0");
    }

    #[test]
    fn breakdown_counts_pod_phases() {
        let ev = Evidence {
            pods: vec![
                PodSummary { name: "a".into(), phase: "Running".into(), ready: true, ..Default::default() },
                PodSummary { name: "b".into(), phase: "Pending".into(), ..Default::default() },
            ],
            ..Default::default()
        };
        let b = WorkloadStrategy::deployment().breakdown(&snap(2, 1), &ev);
        assert_eq!(b, "ready 1/2, updated 1/2, available 1/2; pods: 1 Pending, 1 Running");
    }
}
