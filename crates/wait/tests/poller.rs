#![forbid(unsafe_code)]

use std::time::Duration;

use keel_core::{FindingCategory, Health, Profile, ResourceKind, ResourceRef, StatusSnapshot, SyncStatus, WorkloadStatus};
use keel_health::StrategyRegistry;
use keel_kubehub::{FetchError, MockControlPlane};
use keel_wait::{parse_ignore_list, PollConfig, PollOutcome, PollStatus, Poller, ProgressSink, RetryPolicy, TickReport};
use tokio::time::Instant;

#[derive(Default)]
struct Recorder {
    ticks: Vec<TickReport>,
    finished: Vec<PollOutcome>,
}

impl ProgressSink for Recorder {
    fn tick(&mut self, report: &TickReport) { self.ticks.push(report.clone()); }
    fn finished(&mut self, outcome: &PollOutcome) { self.finished.push(outcome.clone()); }
}

fn workload(desired: i32, ready: i32) -> StatusSnapshot {
    StatusSnapshot::Workload(WorkloadStatus {
        status_reported: true,
        generation: Some(1),
        observed_generation: Some(1),
        desired,
        ready,
        updated: desired,
        available: ready,
        ..Default::default()
    })
}

fn degraded_app() -> StatusSnapshot {
    StatusSnapshot::Sync(SyncStatus {
        status_reported: true,
        sync: Some("Synced".into()),
        health: Some("Degraded".into()),
        health_message: Some("back-off restarting failed container".into()),
        ..Default::default()
    })
}

fn deploy(name: &str) -> ResourceRef { ResourceRef::new(ResourceKind::Deployment, "apps", name) }

fn config(timeout: u64, interval: u64) -> PollConfig {
    PollConfig::new(Duration::from_secs(timeout), Duration::from_secs(interval))
}

fn within(elapsed: Duration, secs: u64) -> bool {
    elapsed >= Duration::from_secs(secs) && elapsed < Duration::from_secs(secs) + Duration::from_millis(500)
}

#[tokio::test(start_paused = true)]
async fn empty_wave_succeeds_immediately() {
    let mock = MockControlPlane::new();
    let registry = StrategyRegistry::with_defaults();
    let mut rec = Recorder::default();
    let out = Poller::new(&mock, &registry).wait_for(&[], &config(60, 5), &mut rec).await;
    assert_eq!(out.status, PollStatus::Converged);
    assert_eq!(out.ticks, 0);
    assert_eq!(rec.finished.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fast_exit_when_everything_is_healthy() {
    let refs = vec![deploy("a"), deploy("b"), deploy("c")];
    let mock = refs.iter().fold(MockControlPlane::new(), |m, r| m.with_snapshot(r, workload(2, 2)));
    let registry = StrategyRegistry::with_defaults();
    let mut rec = Recorder::default();
    let start = Instant::now();
    let out = Poller::new(&mock, &registry).wait_for(&refs, &config(60, 5), &mut rec).await;
    assert_eq!(out.status, PollStatus::Converged);
    assert_eq!(out.ticks, 1);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(rec.ticks.is_empty());
}

#[tokio::test(start_paused = true)]
async fn optional_refs_never_block() {
    let refs: Vec<ResourceRef> = ["x", "y", "z"]
        .iter()
        .map(|n| ResourceRef::new(ResourceKind::Application, "argocd", *n).optional())
        .collect();
    let mock = refs.iter().fold(MockControlPlane::new(), |m, r| m.with_snapshot(r, degraded_app()));
    let registry = StrategyRegistry::with_defaults();
    let out = Poller::new(&mock, &registry).wait_for(&refs, &config(60, 5), &mut Recorder::default()).await;
    assert_eq!(out.status, PollStatus::ConvergedWithWarnings);
    assert!(out.is_success());
    assert_eq!(out.ticks, 1);
    assert_eq!(out.unhealthy().count(), 3);
    assert_eq!(out.blocking().count(), 0);
    assert!(out.resources.iter().all(|r| !r.classification.findings.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn lenient_names_only_apply_outside_production() {
    let refs = vec![deploy("api"), deploy("grafana")];
    let mock = MockControlPlane::new().with_snapshot(&refs[0], workload(1, 1)).with_snapshot(&refs[1], workload(1, 0));
    let registry = StrategyRegistry::with_defaults();
    let poller = Poller::new(&mock, &registry);
    let base = config(10, 5).with_lenient(parse_ignore_list("grafana").unwrap());

    let prod = poller.wait_for(&refs, &base, &mut Recorder::default()).await;
    assert_eq!(prod.status, PollStatus::TimedOut);

    let dev = poller.wait_for(&refs, &base.clone().with_profile(Profile::Dev), &mut Recorder::default()).await;
    assert_eq!(dev.status, PollStatus::ConvergedWithWarnings);
}

#[tokio::test(start_paused = true)]
async fn one_stuck_resource_out_of_five_times_out() {
    let refs: Vec<ResourceRef> = (0..5).map(|i| ResourceRef::new(ResourceKind::StatefulSet, "mq", format!("nats-{}", i))).collect();
    let mock = refs.iter().enumerate().fold(MockControlPlane::new(), |m, (i, r)| {
        m.with_snapshot(r, if i == 4 { workload(3, 2) } else { workload(3, 3) })
    });
    let registry = StrategyRegistry::with_defaults();
    let mut rec = Recorder::default();
    let start = Instant::now();
    let out = Poller::new(&mock, &registry).wait_for(&refs, &config(60, 5), &mut rec).await;

    assert_eq!(out.status, PollStatus::TimedOut);
    assert!(within(start.elapsed(), 60), "elapsed {:?}", start.elapsed());
    assert_eq!(rec.ticks.len(), 12);
    assert_eq!(out.ticks, 13);
    for t in &rec.ticks {
        assert!(t.progress_line().contains("4/5 healthy"), "{}", t.progress_line());
        assert_eq!(t.counts.get(&Health::Progressing), Some(&1));
        assert_eq!(t.diagnosed.len(), 1);
        let findings = &t.diagnosed[0].classification.findings;
        assert_eq!(findings[0].category, FindingCategory::Summary);
        assert!(findings[0].message.contains("ready 2/3"));
    }
    let stuck: Vec<_> = out.unhealthy().collect();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].reference.name, "nats-4");
    assert!(!stuck[0].classification.findings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_at_first_then_healthy_on_third_tick() {
    let r = deploy("late");
    let mock = MockControlPlane::new().with_script(
        &r,
        vec![Ok(StatusSnapshot::Missing), Ok(StatusSnapshot::Missing), Ok(workload(1, 1))],
    );
    let registry = StrategyRegistry::with_defaults();
    let mut rec = Recorder::default();
    let start = Instant::now();
    let out = Poller::new(&mock, &registry).wait_for(std::slice::from_ref(&r), &config(60, 5), &mut rec).await;
    assert_eq!(out.status, PollStatus::Converged);
    assert_eq!(out.ticks, 3);
    assert!(within(start.elapsed(), 10));
    assert_eq!(mock.fetch_count(&r), 3);
    assert_eq!(rec.ticks[0].counts.get(&Health::Missing), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn malformed_status_keeps_waiting() {
    let r = deploy("odd");
    let mock = MockControlPlane::new().with_script(
        &r,
        vec![Ok(StatusSnapshot::malformed("status.replicas: invalid type")), Ok(workload(1, 1))],
    );
    let registry = StrategyRegistry::with_defaults();
    let mut rec = Recorder::default();
    let out = Poller::new(&mock, &registry).wait_for(std::slice::from_ref(&r), &config(60, 5), &mut rec).await;
    assert_eq!(out.status, PollStatus::Converged);
    assert_eq!(out.ticks, 2);
    assert_eq!(rec.ticks[0].counts.get(&Health::Unknown), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried_within_a_tick() {
    let r = deploy("flaky");
    let mock = MockControlPlane::new().with_script(
        &r,
        vec![Err(FetchError::Transient("503".into())), Err(FetchError::Transient("503".into())), Ok(workload(1, 1))],
    );
    let registry = StrategyRegistry::with_defaults();
    let start = Instant::now();
    let out = Poller::new(&mock, &registry)
        .wait_for(std::slice::from_ref(&r), &config(60, 5), &mut Recorder::default())
        .await;
    assert_eq!(out.status, PollStatus::Converged);
    assert_eq!(out.ticks, 1);
    assert_eq!(mock.fetch_count(&r), 3);
    // 2s + 4s of backoff.
    assert!(within(start.elapsed(), 6));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_become_unknown_not_fatal() {
    let r = deploy("down");
    let mock = MockControlPlane::new().with_script(&r, vec![Err(FetchError::Terminal("forbidden".into())), Ok(workload(1, 1))]);
    let registry = StrategyRegistry::with_defaults();
    let mut rec = Recorder::default();
    let cfg = config(60, 5).with_retry(RetryPolicy::none());
    let out = Poller::new(&mock, &registry).wait_for(std::slice::from_ref(&r), &cfg, &mut rec).await;
    assert_eq!(out.status, PollStatus::Converged);
    assert_eq!(out.ticks, 2);
    let first = &rec.ticks[0].diagnosed[0];
    assert_eq!(first.classification.health, Health::Unknown);
    assert_eq!(first.classification.findings[0].category, FindingCategory::Fetch);
}

#[tokio::test(start_paused = true)]
async fn last_sleep_is_clamped_to_the_deadline() {
    let r = deploy("slow");
    let mock = MockControlPlane::new().with_snapshot(&r, workload(2, 1));
    let registry = StrategyRegistry::with_defaults();
    let start = Instant::now();
    let out = Poller::new(&mock, &registry)
        .wait_for(std::slice::from_ref(&r), &config(7, 5), &mut Recorder::default())
        .await;
    assert_eq!(out.status, PollStatus::TimedOut);
    assert_eq!(out.ticks, 3);
    assert!(within(start.elapsed(), 7), "elapsed {:?}", start.elapsed());
}

#[tokio::test(start_paused = true)]
async fn status_is_a_single_round() {
    let refs = vec![deploy("a"), deploy("b")];
    let mock = MockControlPlane::new().with_snapshot(&refs[0], workload(1, 1)).with_snapshot(&refs[1], workload(1, 0));
    let registry = StrategyRegistry::with_defaults();
    let out = Poller::new(&mock, &registry).status(&refs, &config(60, 5)).await;
    assert_eq!(out.status, PollStatus::NotReady);
    assert_eq!(out.ticks, 1);
    assert_eq!(mock.fetch_count(&refs[1]), 1);
    assert!(out.resources[0].classification.findings.is_empty());
    assert!(!out.resources[1].classification.findings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn flapping_refs_are_judged_at_face_value_each_tick() {
    let settling = deploy("settling");
    let flapping = deploy("flapping");
    let mock = MockControlPlane::new()
        .with_script(&settling, vec![Ok(workload(1, 0)), Ok(workload(1, 1))])
        .with_script(&flapping, vec![Ok(workload(1, 1)), Ok(workload(1, 0)), Ok(workload(1, 1))]);
    let registry = StrategyRegistry::with_defaults();
    let mut rec = Recorder::default();
    let start = Instant::now();
    let out = Poller::new(&mock, &registry)
        .wait_for(&[settling.clone(), flapping.clone()], &config(60, 5), &mut rec)
        .await;

    assert_eq!(out.status, PollStatus::Converged);
    assert_eq!(out.ticks, 3);
    assert!(within(start.elapsed(), 10));
    assert_eq!(rec.ticks.len(), 2);
    for t in &rec.ticks {
        assert!(t.progress_line().contains("1/2 healthy"), "{}", t.progress_line());
        assert_eq!(t.diagnosed.len(), 1);
    }
    assert_eq!(rec.ticks[0].diagnosed[0].reference, settling);
    assert_eq!(rec.ticks[1].diagnosed[0].reference, flapping);
}

#[tokio::test(start_paused = true)]
async fn slow_evidence_does_not_stretch_the_session_past_its_timeout() {
    let refs: Vec<ResourceRef> = ["a", "b", "c"].iter().map(|n| ResourceRef::new(ResourceKind::Deployment, "far", *n)).collect();
    let stuck = StatusSnapshot::Workload(WorkloadStatus {
        status_reported: true,
        desired: 1,
        updated: 1,
        selector: Some("app=stuck".into()),
        ..Default::default()
    });
    let mock = refs
        .iter()
        .fold(MockControlPlane::new().with_unreachable_namespace("far"), |m, r| m.with_snapshot(r, stuck.clone()));
    let registry = StrategyRegistry::with_defaults();
    let mut rec = Recorder::default();
    let start = Instant::now();
    let out = Poller::new(&mock, &registry).wait_for(&refs, &config(5, 5), &mut rec).await;

    assert_eq!(out.status, PollStatus::TimedOut);
    assert_eq!(out.ticks, 2);
    // Retried evidence is cut off at the deadline; the final report tries each query once.
    assert!(within(start.elapsed(), 5), "elapsed {:?}", start.elapsed());
    assert_eq!(rec.ticks[0].diagnosed.len(), 3);
    assert_eq!(mock.evidence_calls(), 3 * 3 * 2 + 3 * 3);
    assert!(out.unhealthy().all(|r| !r.classification.findings.is_empty()));
}
