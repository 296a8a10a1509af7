use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use keel_core::{ClaimSummary, EventSummary, PodSummary, ResourceRef, StatusSnapshot};

use crate::{ControlPlane, FetchError};

fn script_key(r: &ResourceRef) -> String { format!("{}/{}", r.kind.key(), r.key()) }

#[derive(Debug, Default)]
struct Script {
    steps: Vec<Result<StatusSnapshot, FetchError>>,
    cursor: usize,
}

/// In-memory control plane for tests.
///
/// Each resource replays a script of fetch results, one step per call; the last
/// step repeats forever. Unscripted resources are `Missing`.
#[derive(Debug, Default)]
pub struct MockControlPlane {
    scripts: Mutex<HashMap<String, Script>>,
    pods: HashMap<String, Vec<PodSummary>>,
    claims: HashMap<String, Vec<ClaimSummary>>,
    events: HashMap<String, Vec<EventSummary>>,
    failing_namespaces: Vec<(String, FetchError)>,
    evidence_calls: AtomicUsize,
}

impl MockControlPlane {
    pub fn new() -> Self { Self::default() }

    pub fn with_script(self, reference: &ResourceRef, steps: Vec<Result<StatusSnapshot, FetchError>>) -> Self {
        if let Ok(mut m) = self.scripts.lock() {
            m.insert(script_key(reference), Script { steps, cursor: 0 });
        }
        self
    }

    pub fn with_snapshot(self, reference: &ResourceRef, snapshot: StatusSnapshot) -> Self {
        self.with_script(reference, vec![Ok(snapshot)])
    }

    pub fn with_pods(mut self, namespace: &str, pods: Vec<PodSummary>) -> Self {
        self.pods.insert(namespace.to_string(), pods);
        self
    }

    pub fn with_claims(mut self, namespace: &str, claims: Vec<ClaimSummary>) -> Self {
        self.claims.insert(namespace.to_string(), claims);
        self
    }

    pub fn with_events(mut self, namespace: &str, events: Vec<EventSummary>) -> Self {
        self.events.insert(namespace.to_string(), events);
        self
    }

    /// Evidence queries against `namespace` fail with a terminal error.
    pub fn with_failing_namespace(mut self, namespace: &str) -> Self {
        let err = FetchError::Terminal(format!("forbidden: namespace {}", namespace));
        self.failing_namespaces.push((namespace.to_string(), err));
        self
    }

    /// Evidence queries against `namespace` time out on every attempt.
    pub fn with_unreachable_namespace(mut self, namespace: &str) -> Self {
        let err = FetchError::Transient(format!("timed out listing in namespace {}", namespace));
        self.failing_namespaces.push((namespace.to_string(), err));
        self
    }

    /// Pod, claim and event queries made so far, including failed ones.
    pub fn evidence_calls(&self) -> usize { self.evidence_calls.load(Ordering::Relaxed) }

    /// Number of `fetch` calls made for `reference` so far.
    pub fn fetch_count(&self, reference: &ResourceRef) -> usize {
        self.scripts.lock().ok().and_then(|m| m.get(&script_key(reference)).map(|s| s.cursor)).unwrap_or(0)
    }

    fn check_namespace(&self, namespace: &str) -> Result<(), FetchError> {
        self.evidence_calls.fetch_add(1, Ordering::Relaxed);
        match self.failing_namespaces.iter().find(|(n, _)| n == namespace) {
            Some((_, err)) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn fetch(&self, reference: &ResourceRef) -> Result<StatusSnapshot, FetchError> {
        let mut scripts = self.scripts.lock().map_err(|_| FetchError::Terminal("mock poisoned".into()))?;
        let script = scripts.entry(script_key(reference)).or_default();
        let step = match script.steps.get(script.cursor).or_else(|| script.steps.last()) {
            Some(step) => step.clone(),
            None => Ok(StatusSnapshot::Missing),
        };
        script.cursor += 1;
        step
    }

    async fn list_pods(&self, namespace: &str, _selector: &str) -> Result<Vec<PodSummary>, FetchError> {
        self.check_namespace(namespace)?;
        Ok(self.pods.get(namespace).cloned().unwrap_or_default())
    }

    async fn list_claims(&self, namespace: &str) -> Result<Vec<ClaimSummary>, FetchError> {
        self.check_namespace(namespace)?;
        Ok(self.claims.get(namespace).cloned().unwrap_or_default())
    }

    async fn warning_events(&self, namespace: &str, limit: usize) -> Result<Vec<EventSummary>, FetchError> {
        self.check_namespace(namespace)?;
        let mut out = self.events.get(namespace).cloned().unwrap_or_default();
        out.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::ResourceKind;

    #[tokio::test]
    async fn replays_script_and_repeats_last_step() {
        let r = ResourceRef::new(ResourceKind::Deployment, "ns", "a");
        let mock = MockControlPlane::new().with_script(
            &r,
            vec![Ok(StatusSnapshot::Missing), Err(FetchError::Transient("503".into())), Ok(StatusSnapshot::malformed("x"))],
        );
        assert_eq!(mock.fetch(&r).await, Ok(StatusSnapshot::Missing));
        assert!(mock.fetch(&r).await.is_err());
        assert_eq!(mock.fetch(&r).await, Ok(StatusSnapshot::malformed("x")));
        assert_eq!(mock.fetch(&r).await, Ok(StatusSnapshot::malformed("x")));
        assert_eq!(mock.fetch_count(&r), 4);
    }

    #[tokio::test]
    async fn failing_namespaces_fail_evidence_queries() {
        let mock = MockControlPlane::new().with_failing_namespace("locked").with_unreachable_namespace("far");
        assert!(!mock.list_claims("locked").await.unwrap_err().is_transient());
        assert!(mock.warning_events("far", 5).await.unwrap_err().is_transient());
        assert!(mock.list_pods("open", "app=x").await.unwrap().is_empty());
        assert_eq!(mock.evidence_calls(), 3);
    }

    #[tokio::test]
    async fn unscripted_resources_are_missing() {
        let r = ResourceRef::new(ResourceKind::StatefulSet, "ns", "b");
        let mock = MockControlPlane::new();
        assert_eq!(mock.fetch(&r).await, Ok(StatusSnapshot::Missing));
    }
}
