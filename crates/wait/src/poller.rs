//! Readiness poller: fetch, classify and report until every required ref is
//! healthy or the session timeout elapses.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use keel_core::{Classification, Evidence, EvidenceRequest, Health, ResourceRef, StatusSnapshot};
use keel_health::{diagnostics::MAX_EVENTS, StrategyRegistry};
use keel_kubehub::{ControlPlane, FetchError};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use serde::{Serialize, Serializer};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::report::ProgressSink;
use crate::retry::{retry_with_backoff, RetryPolicy};

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> { s.serialize_f64(d.as_secs_f64()) }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PollStatus {
    /// Every ref is healthy.
    Converged,
    /// Every required ref is healthy; some optional ones are not.
    ConvergedWithWarnings,
    /// The timeout elapsed with at least one required ref not healthy.
    TimedOut,
    /// One-shot check found a required ref not healthy.
    NotReady,
}

impl PollStatus {
    pub fn is_success(self) -> bool { matches!(self, PollStatus::Converged | PollStatus::ConvergedWithWarnings) }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReport {
    pub reference: ResourceRef,
    pub optional: bool,
    /// Findings are populated only for refs that were diagnosed.
    pub classification: Classification,
}

impl ResourceReport {
    pub fn is_healthy(&self) -> bool { self.classification.is_healthy() }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOutcome {
    pub status: PollStatus,
    /// Observation rounds, including the one at the deadline.
    pub ticks: u32,
    #[serde(serialize_with = "as_secs")]
    pub elapsed: Duration,
    pub resources: Vec<ResourceReport>,
}

impl PollOutcome {
    pub fn is_success(&self) -> bool { self.status.is_success() }

    pub fn unhealthy(&self) -> impl Iterator<Item = &ResourceReport> { self.resources.iter().filter(|r| !r.is_healthy()) }

    /// Required refs that are not healthy.
    pub fn blocking(&self) -> impl Iterator<Item = &ResourceReport> { self.unhealthy().filter(|r| !r.optional) }
}

/// One progress line plus the diagnoses made on that tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub tick: u32,
    #[serde(serialize_with = "as_secs")]
    pub elapsed: Duration,
    pub counts: BTreeMap<Health, usize>,
    pub healthy_required: usize,
    pub required: usize,
    pub diagnosed: Vec<ResourceReport>,
}

impl TickReport {
    /// e.g. `tick 3 (10s): 4/5 healthy [Healthy 4, Progressing 1]`
    pub fn progress_line(&self) -> String {
        let counts: Vec<String> = self.counts.iter().map(|(h, n)| format!("{} {}", h, n)).collect();
        format!(
            "tick {} ({}s): {}/{} healthy [{}]",
            self.tick,
            self.elapsed.as_secs(),
            self.healthy_required,
            self.required,
            counts.join(", ")
        )
    }
}

/// Latest fetch result and verdict for one ref.
#[derive(Debug, Clone)]
struct Observation {
    reference: ResourceRef,
    optional: bool,
    /// `None` when the fetch failed after retries.
    snapshot: Option<StatusSnapshot>,
    classification: Classification,
}

impl Observation {
    fn report(&self) -> ResourceReport {
        ResourceReport { reference: self.reference.clone(), optional: self.optional, classification: self.classification.clone() }
    }
}

/// Live state of one `wait_for` call; dropped on return.
struct PollSession {
    started: Instant,
    last: FxHashMap<ResourceRef, Health>,
}

impl PollSession {
    fn new() -> Self { Self { started: Instant::now(), last: FxHashMap::default() } }

    fn record(&mut self, observed: &[Observation]) {
        for o in observed {
            let now = o.classification.health;
            match self.last.insert(o.reference.clone(), now) {
                Some(prev) if prev != now => {
                    info!(resource = %o.reference, from = %prev, to = %now, reason = ?o.classification.reason, "health changed")
                }
                None => debug!(resource = %o.reference, health = %now, "first observation"),
                _ => {}
            }
        }
    }
}

/// How long evidence gathering for one diagnosis may take.
#[derive(Debug, Clone, Copy)]
enum EvidenceBudget {
    /// Retries allowed, but cut off when the session deadline is reached.
    Until(Duration),
    /// One attempt per query; used once the deadline has passed.
    SingleAttempt,
}

/// Drives fetch → classify → diagnose against a [`ControlPlane`].
pub struct Poller<'a> {
    plane: &'a dyn ControlPlane,
    registry: &'a StrategyRegistry,
}

impl<'a> Poller<'a> {
    pub fn new(plane: &'a dyn ControlPlane, registry: &'a StrategyRegistry) -> Self { Self { plane, registry } }

    async fn fetch(&self, reference: &ResourceRef, config: &PollConfig) -> Result<StatusSnapshot, FetchError> {
        retry_with_backoff(&config.retry, "fetch", || self.plane.fetch(reference)).await
    }

    /// One round: fetch every ref in parallel, then classify.
    async fn observe(&self, refs: &[ResourceRef], config: &PollConfig) -> Vec<Observation> {
        let started = Instant::now();
        let fetched = join_all(refs.iter().map(|r| self.fetch(r, config))).await;
        histogram!("keel_tick_fetch_seconds", started.elapsed().as_secs_f64());
        refs.iter()
            .zip(fetched)
            .map(|(r, res)| {
                let (snapshot, classification) = match res {
                    Ok(snap) => {
                        let cls = self.registry.classify(&r.kind, &snap);
                        (Some(snap), cls)
                    }
                    Err(e) => {
                        warn!(resource = %r, error = %e, "fetch failed; treating as unknown this tick");
                        counter!("keel_fetch_failures_total", 1, "kind" => r.kind.key());
                        (None, Classification::unknown(format!("fetch failed: {}", e)))
                    }
                };
                Observation { reference: r.clone(), optional: config.is_optional(r), snapshot, classification }
            })
            .collect()
    }

    /// Best-effort evidence; failures leave the corresponding list empty.
    async fn gather(&self, reference: &ResourceRef, request: &EvidenceRequest, policy: &RetryPolicy) -> Evidence {
        let ns = reference.namespace.as_str();
        let pods = async {
            match request.pod_selector.as_deref() {
                Some(sel) => retry_with_backoff(policy, "list_pods", || self.plane.list_pods(ns, sel)).await,
                None => Ok(Vec::new()),
            }
        };
        let claims = async {
            if request.claims { retry_with_backoff(policy, "list_claims", || self.plane.list_claims(ns)).await } else { Ok(Vec::new()) }
        };
        let events = async {
            if request.events {
                retry_with_backoff(policy, "warning_events", || self.plane.warning_events(ns, MAX_EVENTS * 4)).await
            } else {
                Ok(Vec::new())
            }
        };
        let (pods, claims, events) = tokio::join!(pods, claims, events);
        Evidence {
            pods: or_empty(reference, "pods", pods),
            claims: or_empty(reference, "claims", claims),
            events: or_empty(reference, "events", events),
        }
    }

    async fn diagnose(&self, o: &Observation, config: &PollConfig, budget: EvidenceBudget) -> ResourceReport {
        let request = self.registry.evidence_request(&o.reference.kind, o.snapshot.as_ref());
        let evidence = if request.is_empty() {
            Evidence::default()
        } else {
            match budget {
                EvidenceBudget::SingleAttempt => self.gather(&o.reference, &request, &RetryPolicy::none()).await,
                EvidenceBudget::Until(remaining) => {
                    match tokio::time::timeout(remaining, self.gather(&o.reference, &request, &config.retry)).await {
                        Ok(evidence) => evidence,
                        Err(_) => {
                            warn!(resource = %o.reference, "evidence gathering cut short by the deadline");
                            Evidence::default()
                        }
                    }
                }
            }
        };
        let findings = self.registry.diagnose(&o.reference, o.snapshot.as_ref(), &o.classification, &evidence);
        let mut report = o.report();
        report.classification.findings = findings;
        report
    }

    /// Every ref, with unhealthy ones diagnosed concurrently.
    async fn full_report(&self, observed: &[Observation], config: &PollConfig, budget: EvidenceBudget) -> Vec<ResourceReport> {
        join_all(observed.iter().map(|o| async move {
            if o.classification.is_healthy() { o.report() } else { self.diagnose(o, config, budget).await }
        }))
        .await
    }

    /// Classify and diagnose once, without waiting.
    pub async fn status(&self, refs: &[ResourceRef], config: &PollConfig) -> PollOutcome {
        let started = Instant::now();
        let observed = self.observe(refs, config).await;
        let status = verdict(&observed).unwrap_or(PollStatus::NotReady);
        let budget = EvidenceBudget::Until(config.timeout.saturating_sub(started.elapsed()));
        PollOutcome { status, ticks: 1, elapsed: started.elapsed(), resources: self.full_report(&observed, config, budget).await }
    }

    /// Poll `refs` until every required one is healthy or `config.timeout` elapses.
    ///
    /// Never returns early on errors: fetch failures and `Unknown` verdicts keep
    /// the session waiting. Sleeps and per-tick evidence gathering are clamped to
    /// the remaining budget, and the final report makes a single attempt per
    /// query, so the call lasts at most `timeout` plus one round of fetches.
    pub async fn wait_for(&self, refs: &[ResourceRef], config: &PollConfig, sink: &mut dyn ProgressSink) -> PollOutcome {
        let mut session = PollSession::new();
        if refs.is_empty() {
            let outcome = PollOutcome { status: PollStatus::Converged, ticks: 0, elapsed: Duration::ZERO, resources: Vec::new() };
            sink.finished(&outcome);
            return outcome;
        }
        info!(resources = refs.len(), timeout_s = config.timeout.as_secs(), interval_s = config.interval.as_secs(), "waiting for readiness");

        let mut tick = 0u32;
        loop {
            tick += 1;
            counter!("keel_ticks_total", 1);
            let observed = self.observe(refs, config).await;
            session.record(&observed);
            let elapsed = session.started.elapsed();

            if let Some(status) = verdict(&observed) {
                info!(tick, elapsed_s = elapsed.as_secs(), ?status, "converged");
                let resources = match status {
                    PollStatus::ConvergedWithWarnings => {
                        let budget = match config.timeout.checked_sub(elapsed) {
                            Some(left) if !left.is_zero() => EvidenceBudget::Until(left),
                            _ => EvidenceBudget::SingleAttempt,
                        };
                        self.full_report(&observed, config, budget).await
                    }
                    _ => observed.iter().map(Observation::report).collect(),
                };
                let outcome = PollOutcome { status, ticks: tick, elapsed, resources };
                sink.finished(&outcome);
                return outcome;
            }

            if elapsed >= config.timeout {
                warn!(tick, elapsed_s = elapsed.as_secs(), "timed out waiting for readiness");
                counter!("keel_poll_timeouts_total", 1);
                let resources = self.full_report(&observed, config, EvidenceBudget::SingleAttempt).await;
                let outcome = PollOutcome { status: PollStatus::TimedOut, ticks: tick, elapsed: session.started.elapsed(), resources };
                sink.finished(&outcome);
                return outcome;
            }

            let budget = EvidenceBudget::Until(config.timeout.saturating_sub(elapsed));
            let targets = observed.iter().filter(|o| !o.optional && !o.classification.is_healthy()).take(config.max_diagnosed_per_tick);
            let diagnosed = join_all(targets.map(|o| self.diagnose(o, config, budget))).await;
            let mut counts: BTreeMap<Health, usize> = BTreeMap::new();
            for o in &observed {
                *counts.entry(o.classification.health).or_default() += 1;
            }
            let required: Vec<&Observation> = observed.iter().filter(|o| !o.optional).collect();
            sink.tick(&TickReport {
                tick,
                elapsed,
                counts,
                healthy_required: required.iter().filter(|o| o.classification.is_healthy()).count(),
                required: required.len(),
                diagnosed,
            });

            let remaining = config.timeout.saturating_sub(session.started.elapsed());
            tokio::time::sleep(config.interval.min(remaining)).await;
        }
    }
}

fn or_empty<T>(reference: &ResourceRef, what: &str, res: Result<Vec<T>, FetchError>) -> Vec<T> {
    res.unwrap_or_else(|e| {
        warn!(resource = %reference, evidence = what, error = %e, "evidence unavailable");
        Vec::new()
    })
}

/// `Some` when every required ref is healthy.
fn verdict(observed: &[Observation]) -> Option<PollStatus> {
    if observed.iter().filter(|o| !o.optional).any(|o| !o.classification.is_healthy()) {
        return None;
    }
    Some(if observed.iter().all(|o| o.classification.is_healthy()) { PollStatus::Converged } else { PollStatus::ConvergedWithWarnings })
}
