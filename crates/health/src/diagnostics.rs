//! Diagnostics collector shared by every kind.
//!
//! Order of findings: kind-specific facts, then the aggregate summary when no
//! specific fact was found, then at most [`MAX_EVENTS`] warning events.

use keel_core::{
    Classification, Condition, DiagnosticFinding, Evidence, EventSummary, FindingCategory, Health, ResourceRef,
    Severity, StatusSnapshot,
};

use crate::KindStrategy;

pub const MAX_EVENTS: usize = 5;

/// Severity for findings that explain `classification`.
pub fn severity_for(classification: &Classification) -> Severity {
    match classification.health {
        Health::Degraded => Severity::Error,
        Health::Healthy => Severity::Info,
        _ => Severity::Warning,
    }
}

/// Findings for conditions that are not satisfied.
///
/// Conditions named in `negative` report a problem when `True` (e.g.
/// `ReplicaFailure`, `Stalled`); every other condition is unsatisfied unless `True`.
pub fn unsatisfied_conditions(conditions: &[Condition], negative: &[&str], severity: Severity) -> Vec<DiagnosticFinding> {
    conditions
        .iter()
        .filter(|c| if negative.contains(&c.type_.as_str()) { c.is_true() } else { !c.is_true() })
        .map(|c| {
            let mut msg = format!("{}={}", c.type_, if c.status.is_empty() { "?" } else { &c.status });
            if let Some(r) = c.reason.as_deref() { msg.push_str(&format!(" ({})", r)); }
            if let Some(m) = c.message.as_deref().filter(|m| !m.is_empty()) { msg.push_str(&format!(": {}", m)); }
            DiagnosticFinding::new(FindingCategory::Condition, c.type_.clone(), msg, severity)
        })
        .collect()
}

/// Alphabet of controller-generated name suffixes (pod-template-hash, pod ids).
const GENERATED_ALPHABET: &str = "bcdfghjklmnpqrstvwxz2456789";

fn generated_segment(s: &str) -> bool {
    !s.is_empty() && (s.bytes().all(|b| b.is_ascii_digit()) || s.chars().all(|c| GENERATED_ALPHABET.contains(c)))
}

/// `object` is `name` itself or one of its generated children: `name-<hash>`,
/// `name-<hash>-<id>` or a StatefulSet ordinal `name-<n>`.
pub fn is_about(object: &str, name: &str) -> bool {
    match object.strip_prefix(name) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('-')
            .map(|suffix| suffix.split('-').count() <= 2 && suffix.split('-').all(generated_segment))
            .unwrap_or(false),
        None => false,
    }
}

/// Events about `reference` first, then newest first; capped at [`MAX_EVENTS`].
pub fn rank_events<'a>(reference: &ResourceRef, events: &'a [EventSummary]) -> Vec<&'a EventSummary> {
    let mut ranked: Vec<&EventSummary> = events.iter().collect();
    ranked.sort_by(|a, b| {
        let ra = is_about(a.object_name(), &reference.name);
        let rb = is_about(b.object_name(), &reference.name);
        rb.cmp(&ra).then(b.last_seen.cmp(&a.last_seen))
    });
    ranked.truncate(MAX_EVENTS);
    ranked
}

fn event_finding(ev: &EventSummary) -> DiagnosticFinding {
    let msg = if ev.count > 1 {
        format!("{} (x{}): {}", ev.reason, ev.count, ev.message)
    } else {
        format!("{}: {}", ev.reason, ev.message)
    };
    DiagnosticFinding::new(FindingCategory::Event, ev.object.clone(), msg, Severity::Warning)
}

/// Build the full finding list for one resource. Never empty for a non-healthy
/// classification; always empty for a healthy one.
pub fn collect(
    strategy: &dyn KindStrategy,
    reference: &ResourceRef,
    snapshot: Option<&StatusSnapshot>,
    classification: &Classification,
    evidence: &Evidence,
) -> Vec<DiagnosticFinding> {
    if classification.is_healthy() { return Vec::new(); }
    let severity = severity_for(classification);
    let subject = reference.key();

    let mut findings = match snapshot {
        None => vec![DiagnosticFinding::new(
            FindingCategory::Fetch,
            subject.clone(),
            classification.reason.clone().unwrap_or_else(|| "status could not be fetched".to_string()),
            severity,
        )],
        Some(StatusSnapshot::Missing) => vec![DiagnosticFinding::new(
            FindingCategory::SubResource,
            subject.clone(),
            if reference.is_cluster_scoped() {
                format!("{} {} does not exist yet", reference.kind.kind_name(), reference.name)
            } else {
                format!("{} {} does not exist yet in namespace {}", reference.kind.kind_name(), reference.name, reference.namespace)
            },
            severity,
        )],
        Some(StatusSnapshot::Malformed { reason }) => vec![DiagnosticFinding::new(
            FindingCategory::Fetch,
            subject.clone(),
            format!("status document did not match the {} schema: {}", reference.kind.kind_name(), reason),
            severity,
        )],
        Some(snap) => strategy.diagnose(reference, snap, classification, evidence),
    };

    if findings.is_empty() {
        let breakdown = snapshot.map(|s| strategy.breakdown(s, evidence)).unwrap_or_default();
        let reason = classification.reason.as_deref().unwrap_or("no reason reported");
        let msg = if breakdown.is_empty() {
            format!("{} ({})", classification.health, reason)
        } else {
            format!("{} ({}); {}", classification.health, reason, breakdown)
        };
        findings.push(DiagnosticFinding::new(FindingCategory::Summary, subject, msg, severity));
    }

    findings.extend(rank_events(reference, &evidence.events).into_iter().map(event_finding));
    findings
}
