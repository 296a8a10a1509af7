//! Argo CD `Application`: sync + health + last operation.

use std::collections::BTreeMap;

use keel_core::{
    AppResource, Classification, DiagnosticFinding, Evidence, FindingCategory, Health, ResourceRef, Severity,
    StatusSnapshot, SyncStatus,
};

use crate::diagnostics::severity_for;
use crate::KindStrategy;

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplicationStrategy;

fn sync_status(snapshot: &StatusSnapshot) -> Option<&SyncStatus> {
    match snapshot {
        StatusSnapshot::Sync(s) => Some(s),
        _ => None,
    }
}

fn error_conditions(s: &SyncStatus) -> impl Iterator<Item = &keel_core::Condition> {
    s.conditions.iter().filter(|c| c.type_.ends_with("Error"))
}

fn resource_line(r: &AppResource) -> String {
    let mut s = format!(
        "sync {}, health {}",
        r.sync.as_deref().unwrap_or("-"),
        r.health.as_deref().unwrap_or("-")
    );
    if let Some(m) = r.health_message.as_deref().filter(|m| !m.is_empty()) { s.push_str(&format!(": {}", m)); }
    s
}

impl KindStrategy for ApplicationStrategy {
    fn classify(&self, snapshot: &StatusSnapshot) -> Classification {
        let Some(s) = sync_status(snapshot) else {
            return Classification::unknown("unexpected status shape for application");
        };
        if !s.status_reported { return Classification::unknown("application controller has not reported status"); }

        let health = s.health.as_deref().unwrap_or("Unknown");
        let sync = s.sync.as_deref().unwrap_or("Unknown");
        let op = s.operation_phase.as_deref();

        if health == "Degraded" {
            return Classification::degraded(s.health_message.clone().unwrap_or_else(|| "health Degraded".into()));
        }
        if let Some(phase @ ("Failed" | "Error")) = op {
            let msg = s.operation_message.as_deref().unwrap_or("no message");
            return Classification::degraded(format!("last sync {}: {}", phase, msg));
        }
        if let Some(c) = error_conditions(s).next() {
            return Classification::degraded(format!("{}: {}", c.type_, c.message.as_deref().unwrap_or("")));
        }
        if matches!(op, Some("Running" | "Terminating")) {
            return Classification::progressing(format!("sync operation {}", op.unwrap_or_default()));
        }
        if sync == "Synced" && health == "Healthy" { return Classification::healthy(); }
        Classification::progressing(format!("sync {}, health {}", sync, health))
    }

    fn diagnose(
        &self,
        _reference: &ResourceRef,
        snapshot: &StatusSnapshot,
        classification: &Classification,
        _evidence: &Evidence,
    ) -> Vec<DiagnosticFinding> {
        let Some(s) = sync_status(snapshot) else { return Vec::new() };
        let severity = severity_for(classification);
        let mut out = Vec::new();

        for c in error_conditions(s) {
            out.push(DiagnosticFinding::new(
                FindingCategory::Condition,
                c.type_.clone(),
                c.message.clone().unwrap_or_default(),
                Severity::Error,
            ));
        }
        if let (Some(phase), Some(msg)) = (s.operation_phase.as_deref(), s.operation_message.as_deref()) {
            if phase != "Succeeded" {
                out.push(DiagnosticFinding::new(FindingCategory::Operation, "sync", format!("{}: {}", phase, msg), severity));
            }
        }

        for r in &s.resources {
            let health = r.health.as_deref();
            let finding = match classification.health {
                Health::Degraded => matches!(health, Some("Degraded" | "Missing")).then_some(Severity::Error),
                Health::Progressing => {
                    let lagging = r.sync.as_deref() == Some("OutOfSync") || matches!(health, Some("Progressing" | "Missing" | "Degraded"));
                    lagging.then_some(Severity::Warning)
                }
                _ => None,
            };
            if let Some(sev) = finding {
                out.push(DiagnosticFinding::new(FindingCategory::SubResource, r.id(), resource_line(r), sev));
            }
        }
        out
    }

    fn breakdown(&self, snapshot: &StatusSnapshot, _evidence: &Evidence) -> String {
        let Some(s) = sync_status(snapshot) else { return String::new() };
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for r in &s.resources {
            *counts.entry(r.health.as_deref().unwrap_or("Untracked")).or_default() += 1;
        }
        let parts: Vec<String> = counts.iter().map(|(h, n)| format!("{} {}", n, h)).collect();
        format!(
            "sync {}, health {}; {} resources{}",
            s.sync.as_deref().unwrap_or("Unknown"),
            s.health.as_deref().unwrap_or("Unknown"),
            s.resources.len(),
            if parts.is_empty() { String::new() } else { format!(" ({})", parts.join(", ")) }
        )
    }
}
