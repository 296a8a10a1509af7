//! Keel kubehub: read-only access to the control plane.
//!
//! Everything the readiness engine knows about the cluster comes through the
//! [`ControlPlane`] trait. [`KubeControlPlane`] talks to a real API server;
//! [`MockControlPlane`] replays scripted snapshots for tests.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use keel_core::{ClaimSummary, EventSummary, PodSummary, ResourceRef, StatusSnapshot};

pub mod decode;
mod kube_plane;
mod mock;

pub use kube_plane::{get_kube_client, KubeControlPlane, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
pub use mock::MockControlPlane;

/// Failure to talk to the control plane. A missing object is never an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Timeouts, refused connections, 5xx and throttling; worth retrying.
    #[error("transient control-plane error: {0}")]
    Transient(String),
    /// Auth failures, bad requests and client-side errors.
    #[error("control-plane error: {0}")]
    Terminal(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool { matches!(self, FetchError::Transient(_)) }
}

impl From<kube::Error> for FetchError {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(ae) if ae.code >= 500 || ae.code == 429 || ae.code == 408 => FetchError::Transient(e.to_string()),
            kube::Error::Api(_) => FetchError::Terminal(e.to_string()),
            kube::Error::HyperError(_) | kube::Error::Service(_) | kube::Error::ReadEvents(_) => FetchError::Transient(e.to_string()),
            _ => FetchError::Terminal(e.to_string()),
        }
    }
}

/// Read-only control-plane queries used by the readiness engine.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Current status of `reference`. Returns [`StatusSnapshot::Missing`] when the
    /// object (or its CRD) does not exist yet.
    async fn fetch(&self, reference: &ResourceRef) -> Result<StatusSnapshot, FetchError>;

    /// Pods in `namespace` matching the label `selector`.
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodSummary>, FetchError>;

    /// Persistent volume claims in `namespace`.
    async fn list_claims(&self, namespace: &str) -> Result<Vec<ClaimSummary>, FetchError>;

    /// Warning events in `namespace`, newest first, at most `limit`.
    async fn warning_events(&self, namespace: &str, limit: usize) -> Result<Vec<EventSummary>, FetchError>;
}
