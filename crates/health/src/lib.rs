//! Keel health: classify status snapshots and explain non-healthy ones.
//!
//! Each resource kind gets one [`KindStrategy`]. Strategies are looked up in a
//! [`StrategyRegistry`] keyed by [`ResourceKind::key`]; kinds with no dedicated
//! strategy fall back to [`GenericStrategy`], which follows the common
//! `Ready`/`Stalled`/`Reconciling` condition conventions. Adding a kind means
//! registering one more strategy; callers never branch on kind.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use keel_core::{Classification, DiagnosticFinding, Evidence, EvidenceRequest, ResourceKind, ResourceRef, StatusSnapshot};
use tracing::trace;

mod application;
mod conditioned;
pub mod diagnostics;
mod workload;

pub use application::ApplicationStrategy;
pub use conditioned::{ExternalSecretStrategy, GenericStrategy};
pub use workload::WorkloadStrategy;

/// Kind-specific classification and diagnosis rules.
///
/// `Missing` and `Malformed` snapshots are handled by the registry before a
/// strategy is consulted, so strategies only see shapes that decoded.
pub trait KindStrategy: Send + Sync {
    /// Pure function of the snapshot.
    fn classify(&self, snapshot: &StatusSnapshot) -> Classification;

    /// Evidence to gather before [`KindStrategy::diagnose`] runs.
    fn evidence(&self, _snapshot: &StatusSnapshot) -> EvidenceRequest { EvidenceRequest::events_only() }

    /// Specific findings for a non-healthy classification. Events and the
    /// fallback summary are added by [`diagnostics::collect`].
    fn diagnose(
        &self,
        reference: &ResourceRef,
        snapshot: &StatusSnapshot,
        classification: &Classification,
        evidence: &Evidence,
    ) -> Vec<DiagnosticFinding>;

    /// Aggregate breakdown (counts by sub-resource health) used when nothing
    /// more specific could be said.
    fn breakdown(&self, snapshot: &StatusSnapshot, evidence: &Evidence) -> String;
}

pub struct StrategyRegistry {
    strategies: HashMap<String, Box<dyn KindStrategy>>,
    fallback: Box<dyn KindStrategy>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.strategies.keys().collect();
        keys.sort();
        f.debug_struct("StrategyRegistry").field("kinds", &keys).finish()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self { Self::with_defaults() }
}

impl StrategyRegistry {
    /// Registry with only the generic fallback.
    pub fn empty() -> Self { Self { strategies: HashMap::new(), fallback: Box::new(GenericStrategy) } }

    /// Registry with the builtin workload, secret and application strategies.
    pub fn with_defaults() -> Self {
        let mut r = Self::empty();
        r.register(ResourceKind::Deployment.key(), WorkloadStrategy::deployment());
        r.register(ResourceKind::StatefulSet.key(), WorkloadStrategy::statefulset());
        r.register(ResourceKind::DaemonSet.key(), WorkloadStrategy::daemonset());
        r.register(ResourceKind::ExternalSecret.key(), ExternalSecretStrategy);
        r.register(ResourceKind::Application.key(), ApplicationStrategy);
        r
    }

    /// Register (or replace) the strategy for a kind key such as `Deployment`
    /// or `Cluster.postgresql.cnpg.io`.
    pub fn register(&mut self, key: impl Into<String>, strategy: impl KindStrategy + 'static) {
        self.strategies.insert(key.into(), Box::new(strategy));
    }

    pub fn strategy_for(&self, kind: &ResourceKind) -> &dyn KindStrategy {
        match self.strategies.get(&kind.key()) {
            Some(s) => s.as_ref(),
            None => {
                trace!(kind = %kind, "no dedicated strategy; using generic conditions");
                self.fallback.as_ref()
            }
        }
    }

    pub fn classify(&self, kind: &ResourceKind, snapshot: &StatusSnapshot) -> Classification {
        match snapshot {
            StatusSnapshot::Missing => Classification::missing(),
            StatusSnapshot::Malformed { reason } => Classification::unknown(format!("malformed status: {}", reason)),
            other => self.strategy_for(kind).classify(other),
        }
    }

    /// What to fetch before diagnosing. `None` when the snapshot itself is unavailable.
    pub fn evidence_request(&self, kind: &ResourceKind, snapshot: Option<&StatusSnapshot>) -> EvidenceRequest {
        match snapshot {
            Some(StatusSnapshot::Workload(_) | StatusSnapshot::Sync(_) | StatusSnapshot::Conditioned(_)) => {
                snapshot.map(|s| self.strategy_for(kind).evidence(s)).unwrap_or_default()
            }
            _ => EvidenceRequest::events_only(),
        }
    }

    /// Findings for `classification`; empty iff it is `Healthy`.
    pub fn diagnose(
        &self,
        reference: &ResourceRef,
        snapshot: Option<&StatusSnapshot>,
        classification: &Classification,
        evidence: &Evidence,
    ) -> Vec<DiagnosticFinding> {
        diagnostics::collect(self.strategy_for(&reference.kind), reference, snapshot, classification, evidence)
    }
}
