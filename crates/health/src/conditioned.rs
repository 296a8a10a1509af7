//! Condition-list kinds: ExternalSecret and any custom resource following the
//! `Ready`/`Stalled`/`Reconciling` conventions.

use keel_core::{Classification, Condition, ConditionedStatus, DiagnosticFinding, Evidence, ResourceRef, StatusSnapshot};

use crate::diagnostics::{severity_for, unsatisfied_conditions};
use crate::KindStrategy;

fn conditioned(snapshot: &StatusSnapshot) -> Option<&ConditionedStatus> {
    match snapshot {
        StatusSnapshot::Conditioned(c) => Some(c),
        _ => None,
    }
}

fn describe(c: &Condition) -> String {
    match (c.reason.as_deref(), c.message.as_deref().filter(|m| !m.is_empty())) {
        (Some(r), Some(m)) => format!("{}: {}", r, m),
        (Some(r), None) => r.to_string(),
        (None, Some(m)) => m.to_string(),
        (None, None) => format!("{}={}", c.type_, c.status),
    }
}

fn generation_lag(c: &ConditionedStatus) -> Option<Classification> {
    (!c.generation_observed()).then(|| {
        Classification::progressing(format!(
            "observed generation {} behind {}",
            c.observed_generation.unwrap_or_default(),
            c.generation.unwrap_or_default()
        ))
    })
}

fn condition_summary(snapshot: &StatusSnapshot) -> String {
    let conds = snapshot.conditions();
    if conds.is_empty() { return "no conditions reported".to_string(); }
    conds.iter().map(|c| format!("{}={}", c.type_, c.status)).collect::<Vec<_>>().join(", ")
}

/// external-secrets.io `ExternalSecret`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalSecretStrategy;

impl KindStrategy for ExternalSecretStrategy {
    fn classify(&self, snapshot: &StatusSnapshot) -> Classification {
        let Some(c) = conditioned(snapshot) else {
            return Classification::unknown("unexpected status shape for external secret");
        };
        if !c.status_reported { return Classification::unknown("operator has not reported status"); }
        match c.condition("Ready") {
            Some(r) if r.is_false() && r.reason.as_deref() == Some("SecretSyncedError") => Classification::degraded(describe(r)),
            Some(r) if r.is_true() => generation_lag(c).unwrap_or_else(Classification::healthy),
            Some(r) => Classification::progressing(describe(r)),
            None => Classification::progressing("Ready condition not reported yet"),
        }
    }

    fn diagnose(&self, _: &ResourceRef, snapshot: &StatusSnapshot, cls: &Classification, _: &Evidence) -> Vec<DiagnosticFinding> {
        unsatisfied_conditions(snapshot.conditions(), &[], severity_for(cls))
    }

    fn breakdown(&self, snapshot: &StatusSnapshot, _: &Evidence) -> String { condition_summary(snapshot) }
}

/// Fallback for kinds without a dedicated strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericStrategy;

const NEGATIVE: [&str; 2] = ["Stalled", "Reconciling"];

fn failure_reason(c: &Condition) -> bool {
    c.reason.as_deref().map(|r| r.contains("Error") || r.contains("Fail")).unwrap_or(false)
}

impl KindStrategy for GenericStrategy {
    fn classify(&self, snapshot: &StatusSnapshot) -> Classification {
        let Some(c) = conditioned(snapshot) else {
            return Classification::unknown("unexpected status shape");
        };
        if let Some(s) = c.condition("Stalled").filter(|s| s.is_true()) {
            return Classification::degraded(describe(s));
        }
        for t in ["Ready", "Synced"] {
            if let Some(x) = c.condition(t).filter(|x| x.is_false() && failure_reason(x)) {
                return Classification::degraded(describe(x));
            }
        }
        if let Some(lag) = generation_lag(c) { return lag; }
        if let Some(r) = c.condition("Reconciling").filter(|r| r.is_true()) {
            return Classification::progressing(describe(r));
        }
        let ready = c.condition("Ready");
        let synced_false = c.condition("Synced").map(|s| s.is_false()).unwrap_or(false);
        match ready {
            Some(r) if r.is_true() && !synced_false => Classification::healthy(),
            Some(r) if r.is_true() => Classification::progressing("Synced condition is False"),
            Some(r) => Classification::progressing(describe(r)),
            None if !c.status_reported => Classification::unknown("no status reported"),
            None => Classification::progressing("Ready condition not reported yet"),
        }
    }

    fn diagnose(&self, _: &ResourceRef, snapshot: &StatusSnapshot, cls: &Classification, _: &Evidence) -> Vec<DiagnosticFinding> {
        unsatisfied_conditions(snapshot.conditions(), &NEGATIVE, severity_for(cls))
    }

    fn breakdown(&self, snapshot: &StatusSnapshot, _: &Evidence) -> String { condition_summary(snapshot) }
}
