//! Human-facing output: progress lines, failure reports and follow-up commands.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write;

use keel_core::{DiagnosticFinding, ResourceKind, ResourceRef};

use crate::poller::{PollOutcome, PollStatus, ResourceReport, TickReport};
use crate::sequencer::{RunReport, StageReport};

/// Receives progress from the poller and the sequencer.
pub trait ProgressSink: Send {
    fn tick(&mut self, report: &TickReport);
    fn finished(&mut self, outcome: &PollOutcome);
    fn stage_started(&mut self, _name: &str, _index: usize, _total: usize) {}
    fn stage_finished(&mut self, _report: &StageReport) {}
}

/// Discards everything; used for JSON output where only the final document is printed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn tick(&mut self, _: &TickReport) {}
    fn finished(&mut self, _: &PollOutcome) {}
}

/// Writes progress and reports to a writer (stdout by default).
///
/// Findings identical to the ones printed for the same ref on the previous tick
/// are collapsed into a single "unchanged" line.
pub struct ConsoleReporter<W: Write + Send = std::io::Stdout> {
    out: W,
    last: HashMap<ResourceRef, Vec<DiagnosticFinding>>,
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout() -> Self { Self::new(std::io::stdout()) }
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub fn new(out: W) -> Self { Self { out, last: HashMap::new() } }

    pub fn into_inner(self) -> W { self.out }

    fn emit(&mut self, text: &str) {
        // Broken pipes are not worth failing a bootstrap over.
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> ProgressSink for ConsoleReporter<W> {
    fn tick(&mut self, report: &TickReport) {
        let mut text = format!("{}\n", report.progress_line());
        for r in &report.diagnosed {
            let findings = &r.classification.findings;
            if self.last.get(&r.reference) == Some(findings) {
                let _ = writeln!(text, "  {} {}: unchanged", r.reference, r.classification.health);
                continue;
            }
            write_resource(&mut text, r);
            self.last.insert(r.reference.clone(), findings.clone());
        }
        self.emit(&text);
    }

    fn finished(&mut self, outcome: &PollOutcome) {
        self.last.clear();
        let text = match outcome.status {
            PollStatus::Converged => format!("all {} resources healthy after {}s\n", outcome.resources.len(), outcome.elapsed.as_secs()),
            _ => render_report(outcome),
        };
        self.emit(&text);
    }

    fn stage_started(&mut self, name: &str, index: usize, total: usize) {
        self.emit(&format!("==> stage {}/{}: {}\n", index + 1, total, name));
    }

    fn stage_finished(&mut self, report: &StageReport) {
        self.emit(&format!("<== stage {}: {}\n", report.name, report.state));
    }
}

fn write_resource(text: &mut String, r: &ResourceReport) {
    let reason = r.classification.reason.as_deref().unwrap_or("");
    let _ = writeln!(text, "  {}{} {}: {}", r.reference, if r.optional { " (optional)" } else { "" }, r.classification.health, reason);
    for f in &r.classification.findings {
        let _ = writeln!(text, "    - {}", f);
    }
}

/// Follow-up inspection commands for one unhealthy ref.
pub fn suggested_commands(reference: &ResourceRef) -> Vec<String> {
    let ns = &reference.namespace;
    let kind = reference.kind.kubectl_name();
    let name = &reference.name;
    if reference.is_cluster_scoped() {
        return vec![
            format!("kubectl describe {} {}", kind, name),
            format!("kubectl get {} {} -o yaml", kind, name),
            format!("kubectl get events -n default --field-selector type=Warning,involvedObject.name={}", name),
        ];
    }
    let mut cmds = vec![format!("kubectl describe {} {} -n {}", kind, name, ns)];
    match &reference.kind {
        ResourceKind::Deployment | ResourceKind::DaemonSet => {
            cmds.push(format!("kubectl logs -n {} {}/{} --all-containers --tail=50", ns, kind, name));
        }
        ResourceKind::StatefulSet => {
            cmds.push(format!("kubectl logs -n {} {}/{} --all-containers --tail=50", ns, kind, name));
            cmds.push(format!("kubectl get pvc -n {}", ns));
        }
        ResourceKind::Application => cmds.push(format!("kubectl get application {} -n {} -o yaml", name, ns)),
        ResourceKind::ExternalSecret | ResourceKind::Custom { .. } => {
            cmds.push(format!("kubectl get {} {} -n {} -o yaml", kind, name, ns));
        }
    }
    cmds.push(format!("kubectl get events -n {} --field-selector type=Warning --sort-by=.lastTimestamp", ns));
    cmds
}

/// Status table, per-resource findings and follow-up commands.
pub fn render_report(outcome: &PollOutcome) -> String {
    let mut text = String::new();
    let headline = match outcome.status {
        PollStatus::Converged => "converged",
        PollStatus::ConvergedWithWarnings => "converged with warnings (optional resources not healthy)",
        PollStatus::TimedOut => "timed out: required resources not healthy",
        PollStatus::NotReady => "not ready: required resources not healthy",
    };
    let _ = writeln!(text, "{} after {}s ({} ticks)", headline, outcome.elapsed.as_secs(), outcome.ticks);

    let width = outcome.resources.iter().map(|r| r.reference.to_string().len()).max().unwrap_or(8).max(8);
    let _ = writeln!(text, "{:<width$}  {:<8}  {:<11}  REASON", "RESOURCE", "OPTIONAL", "HEALTH", width = width);
    for r in &outcome.resources {
        let _ = writeln!(
            text,
            "{:<width$}  {:<8}  {:<11}  {}",
            r.reference.to_string(),
            if r.optional { "yes" } else { "no" },
            r.classification.health.as_str(),
            r.classification.reason.as_deref().unwrap_or("-"),
            width = width
        );
    }

    let unhealthy: Vec<&ResourceReport> = outcome.unhealthy().collect();
    if unhealthy.is_empty() { return text; }

    text.push_str("\nFindings:\n");
    for r in &unhealthy {
        write_resource(&mut text, r);
    }
    text.push_str("\nSuggested commands:\n");
    for r in &unhealthy {
        for cmd in suggested_commands(&r.reference) {
            let _ = writeln!(text, "  {}", cmd);
        }
    }
    text
}

/// One line per stage, then the refs that blocked the failed stage, if any.
/// The failed stage's full report is printed by the sink when it finishes.
pub fn render_run(report: &RunReport) -> String {
    let mut text = String::new();
    let width = report.stages.iter().map(|s| s.name.len()).max().unwrap_or(5).max(5);
    let _ = writeln!(text, "{:<width$}  {:<22}  POLICY", "STAGE", "STATE", width = width);
    for s in &report.stages {
        let _ = writeln!(text, "{:<width$}  {:<22}  {}", s.name, s.state.to_string(), s.policy, width = width);
    }
    if let Some(failed) = report.failed_stage() {
        let _ = writeln!(text, "\nstage {} failed; blocked by:", failed.name);
        for r in failed.outcome.iter().flat_map(|o| o.blocking()) {
            let _ = writeln!(text, "  {} {}: {}", r.reference, r.classification.health, r.classification.reason.as_deref().unwrap_or("-"));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::FailurePolicy;
    use crate::sequencer::StageState;
    use keel_core::{Classification, FindingCategory, Severity};
    use std::time::Duration;

    fn progressing(name: &str) -> ResourceReport {
        let mut cls = Classification::progressing("ready 0/1");
        cls.findings = vec![DiagnosticFinding::new(FindingCategory::Summary, name, "Progressing (ready 0/1)", Severity::Warning)];
        ResourceReport { reference: ResourceRef::new(ResourceKind::StatefulSet, "db", name), optional: false, classification: cls }
    }

    #[test]
    fn repeated_findings_are_collapsed() {
        let mut rep = ConsoleReporter::new(Vec::new());
        let tick = |n| TickReport {
            tick: n,
            elapsed: Duration::from_secs(5 * (n as u64 - 1)),
            counts: Default::default(),
            healthy_required: 0,
            required: 1,
            diagnosed: vec![progressing("pg")],
        };
        rep.tick(&tick(1));
        rep.tick(&tick(2));
        let out = String::from_utf8(rep.into_inner()).unwrap();
        assert_eq!(out.matches("Progressing (ready 0/1)").count(), 1);
        assert!(out.contains("statefulset/db/pg Progressing: unchanged"));
    }

    #[test]
    fn failure_report_has_table_findings_and_commands() {
        let outcome = PollOutcome {
            status: PollStatus::TimedOut,
            ticks: 13,
            elapsed: Duration::from_secs(60),
            resources: vec![progressing("pg")],
        };
        let text = render_report(&outcome);
        assert!(text.starts_with("timed out"));
        assert!(text.contains("RESOURCE"));
        assert!(text.contains("Findings:"));
        assert!(text.contains("kubectl describe statefulset pg -n db"));
        assert!(text.contains("kubectl get pvc -n db"));
    }

    #[test]
    fn cluster_scoped_commands_have_no_namespace_flag() {
        let kind: ResourceKind = "ClusterSecretStore.v1beta1.external-secrets.io".parse().unwrap();
        let cmds = suggested_commands(&ResourceRef::cluster(kind, "vault"));
        assert_eq!(cmds[0], "kubectl describe clustersecretstore.external-secrets.io vault");
        assert!(cmds[..2].iter().all(|c| !c.contains(" -n ")));
    }

    #[test]
    fn run_summary_names_what_blocked_the_failed_stage() {
        let outcome = PollOutcome { status: PollStatus::TimedOut, ticks: 13, elapsed: Duration::from_secs(60), resources: vec![progressing("pg")] };
        let stage = |name: &str, state, outcome| StageReport { name: name.into(), state, policy: FailurePolicy::FailFast, outcome };
        let report = RunReport {
            stages: vec![
                stage("control-plane", StageState::Succeeded, None),
                stage("databases", StageState::Failed, Some(outcome)),
                stage("tenants", StageState::Pending, None),
            ],
        };
        let text = render_run(&report);
        assert!(text.contains("databases"));
        assert!(text.contains("stage databases failed; blocked by:"));
        assert!(text.contains("statefulset/db/pg Progressing: ready 0/1"));

        let ok = RunReport { stages: vec![stage("control-plane", StageState::Succeeded, None)] };
        assert!(!render_run(&ok).contains("blocked by"));
    }
}
