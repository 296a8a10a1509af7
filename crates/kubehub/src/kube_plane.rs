use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Event, PersistentVolumeClaim, Pod};
use keel_core::{ClaimSummary, EventSummary, PodSummary, ResourceKind, ResourceRef, StatusSnapshot};
use kube::{
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    Client, Config,
};
use metrics::counter;
use tracing::{debug, trace, warn};

use crate::decode::{claim_summary, decode_snapshot, event_summary, pod_summary};
use crate::{ControlPlane, FetchError};

/// Connect timeout for the kube client.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout; bounds the latency of a single fetch.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a client from an explicit kubeconfig path or the inferred environment.
pub async fn get_kube_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .context("loading kubeconfig")?
        }
        None => Config::infer().await.context("inferring kube config")?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).context("creating kube client")
}

/// Namespace to query `reference` in; `None` for a cluster-scoped kind. A
/// namespace on a cluster-scoped kind is ignored, as kubectl does.
fn fetch_namespace(reference: &ResourceRef, namespaced: bool) -> Result<Option<&str>, FetchError> {
    match (namespaced, reference.is_cluster_scoped()) {
        (true, false) => Ok(Some(reference.namespace.as_str())),
        (true, true) => Err(FetchError::Terminal(format!("{} is namespaced; use kind/namespace/name", reference.kind))),
        (false, cluster_ref) => {
            if !cluster_ref {
                debug!(resource = %reference, "kind is cluster-scoped; ignoring namespace");
            }
            Ok(None)
        }
    }
}

/// [`ControlPlane`] backed by a live API server. Read-only.
pub struct KubeControlPlane {
    client: Client,
    /// Discovered CRD resources and whether they are namespaced, keyed by
    /// `group/version/Kind`. Misses are not cached: a CRD may be installed by an
    /// earlier wave while we poll.
    resources: Mutex<HashMap<String, (ApiResource, bool)>>,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self { Self { client, resources: Mutex::new(HashMap::new()) } }

    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        Ok(Self::new(get_kube_client(kubeconfig).await?))
    }

    /// The served resource for `kind` and whether it is namespaced.
    async fn api_resource(&self, kind: &ResourceKind) -> Result<Option<(ApiResource, bool)>, FetchError> {
        match kind {
            ResourceKind::Deployment => return Ok(Some((ApiResource::erase::<Deployment>(&()), true))),
            ResourceKind::StatefulSet => return Ok(Some((ApiResource::erase::<StatefulSet>(&()), true))),
            ResourceKind::DaemonSet => return Ok(Some((ApiResource::erase::<DaemonSet>(&()), true))),
            _ => {}
        }
        let (group, version) = kind.group_version();
        let cache_key = format!("{}/{}/{}", group, version, kind.kind_name());
        if let Some(hit) = self.resources.lock().ok().and_then(|m| m.get(&cache_key).cloned()) {
            return Ok(Some(hit));
        }

        let discovery = Discovery::new(self.client.clone()).filter(&[group]).run().await?;
        let mut found: Option<(ApiResource, bool)> = None;
        for g in discovery.groups() {
            // Prefer the requested version; fall back to whatever the server recommends.
            let exact = g.versioned_resources(version).into_iter().find(|(ar, _)| ar.kind == kind.kind_name());
            let any = || g.recommended_resources().into_iter().find(|(ar, _)| ar.kind == kind.kind_name());
            if let Some((ar, caps)) = exact.or_else(any) {
                found = Some((ar, matches!(caps.scope, Scope::Namespaced)));
                break;
            }
        }
        match &found {
            Some((ar, namespaced)) => {
                debug!(gvk = %cache_key, served = %ar.version, namespaced, "resolved custom resource");
                if let Ok(mut m) = self.resources.lock() {
                    m.insert(cache_key, (ar.clone(), *namespaced));
                }
            }
            None => trace!(gvk = %cache_key, "kind not served (yet)"),
        }
        Ok(found)
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn fetch(&self, reference: &ResourceRef) -> Result<StatusSnapshot, FetchError> {
        let kind_key = reference.kind.key();
        let (ar, namespaced) = match self.api_resource(&reference.kind).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                counter!("keel_fetch_total", 1, "kind" => kind_key, "outcome" => "missing");
                return Ok(StatusSnapshot::Missing);
            }
            Err(e) => {
                counter!("keel_fetch_total", 1, "kind" => kind_key, "outcome" => "error");
                return Err(e);
            }
        };
        let api: Api<DynamicObject> = match fetch_namespace(reference, namespaced) {
            Ok(Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            Ok(None) => Api::all_with(self.client.clone(), &ar),
            Err(e) => {
                warn!(resource = %reference, "kind is namespaced but the ref has no namespace");
                counter!("keel_fetch_total", 1, "kind" => kind_key, "outcome" => "error");
                return Err(e);
            }
        };
        match api.get_opt(&reference.name).await {
            Ok(Some(obj)) => {
                counter!("keel_fetch_total", 1, "kind" => kind_key, "outcome" => "found");
                let raw = serde_json::to_value(&obj).map_err(|e| FetchError::Terminal(format!("serializing {}: {}", reference, e)))?;
                Ok(decode_snapshot(&reference.kind, raw))
            }
            Ok(None) => {
                counter!("keel_fetch_total", 1, "kind" => kind_key, "outcome" => "missing");
                Ok(StatusSnapshot::Missing)
            }
            Err(e) => {
                counter!("keel_fetch_total", 1, "kind" => kind_key, "outcome" => "error");
                Err(e.into())
            }
        }
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodSummary>, FetchError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(selector)).await?;
        Ok(pods.items.iter().map(pod_summary).collect())
    }

    async fn list_claims(&self, namespace: &str) -> Result<Vec<ClaimSummary>, FetchError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let claims = api.list(&ListParams::default()).await?;
        Ok(claims.items.iter().map(claim_summary).collect())
    }

    async fn warning_events(&self, namespace: &str, limit: usize) -> Result<Vec<EventSummary>, FetchError> {
        // Events about cluster-scoped objects are recorded in `default`.
        let namespace = if namespace.is_empty() { "default" } else { namespace };
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let events = api.list(&ListParams::default().fields("type=Warning")).await?;
        let mut out: Vec<EventSummary> = events.items.iter().map(event_summary).collect();
        out.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        out.truncate(limit);
        Ok(out)
    }
}
