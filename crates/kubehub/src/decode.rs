//! Boundary decoding: raw API documents into typed snapshots and summaries.
//!
//! Each kind is decoded against an explicit schema exactly once. A document that
//! does not fit becomes [`StatusSnapshot::Malformed`] instead of silently
//! yielding empty fields.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Event, PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use keel_core::{
    AppResource, ClaimSummary, Condition, ConditionedStatus, EventSummary, PodSummary, ResourceKind,
    StatusSnapshot, SyncStatus, WorkloadStatus,
};
use serde::Deserialize;
use serde_json::Value as Json;

/// Decode a full object document (as returned by a GET) for `kind`.
pub fn decode_snapshot(kind: &ResourceKind, raw: Json) -> StatusSnapshot {
    match kind {
        ResourceKind::Deployment => decode_deployment(raw),
        ResourceKind::StatefulSet => decode_statefulset(raw),
        ResourceKind::DaemonSet => decode_daemonset(raw),
        ResourceKind::Application => decode_application(raw),
        ResourceKind::ExternalSecret | ResourceKind::Custom { .. } => decode_conditioned(raw),
    }
}

fn convert_conditions<I>(it: I) -> smallvec::SmallVec<[Condition; 4]>
where
    I: IntoIterator<Item = (String, String, Option<String>, Option<String>)>,
{
    it.into_iter()
        .map(|(type_, status, reason, message)| Condition { type_, status, reason, message })
        .collect()
}

/// Render `matchLabels` as `k=v,...`. Expressions are not rendered.
pub fn selector_string(sel: &LabelSelector) -> Option<String> {
    let labels = sel.match_labels.as_ref()?;
    if labels.is_empty() { return None; }
    Some(labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(","))
}

fn decode_deployment(raw: Json) -> StatusSnapshot {
    let d: Deployment = match serde_json::from_value(raw) {
        Ok(d) => d,
        Err(e) => return StatusSnapshot::malformed(format!("Deployment: {}", e)),
    };
    let spec = d.spec.unwrap_or_default();
    let reported = d.status.is_some();
    let s = d.status.unwrap_or_default();
    StatusSnapshot::Workload(WorkloadStatus {
        status_reported: reported,
        generation: d.metadata.generation,
        observed_generation: s.observed_generation,
        desired: spec.replicas.unwrap_or(1),
        ready: s.ready_replicas.unwrap_or(0),
        updated: s.updated_replicas.unwrap_or(0),
        available: s.available_replicas.unwrap_or(0),
        selector: selector_string(&spec.selector),
        claim_templates: Vec::new(),
        conditions: convert_conditions(s.conditions.unwrap_or_default().into_iter().map(|c| (c.type_, c.status, c.reason, c.message))),
    })
}

fn decode_statefulset(raw: Json) -> StatusSnapshot {
    let sts: StatefulSet = match serde_json::from_value(raw) {
        Ok(s) => s,
        Err(e) => return StatusSnapshot::malformed(format!("StatefulSet: {}", e)),
    };
    let spec = sts.spec.unwrap_or_default();
    let reported = sts.status.is_some();
    let s = sts.status.unwrap_or_default();
    let claim_templates = spec
        .volume_claim_templates
        .unwrap_or_default()
        .into_iter()
        .filter_map(|t| t.metadata.name)
        .collect();
    StatusSnapshot::Workload(WorkloadStatus {
        status_reported: reported,
        generation: sts.metadata.generation,
        observed_generation: s.observed_generation,
        desired: spec.replicas.unwrap_or(1),
        ready: s.ready_replicas.unwrap_or(0),
        updated: s.updated_replicas.unwrap_or(0),
        available: s.available_replicas.unwrap_or(0),
        selector: selector_string(&spec.selector),
        claim_templates,
        conditions: convert_conditions(s.conditions.unwrap_or_default().into_iter().map(|c| (c.type_, c.status, c.reason, c.message))),
    })
}

fn decode_daemonset(raw: Json) -> StatusSnapshot {
    let ds: DaemonSet = match serde_json::from_value(raw) {
        Ok(d) => d,
        Err(e) => return StatusSnapshot::malformed(format!("DaemonSet: {}", e)),
    };
    let spec = ds.spec.unwrap_or_default();
    let reported = ds.status.is_some();
    let s = ds.status.unwrap_or_default();
    StatusSnapshot::Workload(WorkloadStatus {
        status_reported: reported,
        generation: ds.metadata.generation,
        observed_generation: s.observed_generation,
        desired: s.desired_number_scheduled,
        ready: s.number_ready,
        updated: s.updated_number_scheduled.unwrap_or(0),
        available: s.number_available.unwrap_or(0),
        selector: selector_string(&spec.selector),
        claim_templates: Vec::new(),
        conditions: convert_conditions(s.conditions.unwrap_or_default().into_iter().map(|c| (c.type_, c.status, c.reason, c.message))),
    })
}

#[derive(Debug, Default, Deserialize)]
struct MetaDoc {
    #[serde(default)]
    generation: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionedDoc {
    #[serde(default)]
    metadata: MetaDoc,
    #[serde(default)]
    status: Option<ConditionedStatusDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionedStatusDoc {
    #[serde(default)]
    observed_generation: Option<i64>,
    #[serde(default)]
    conditions: Vec<Condition>,
}

fn decode_conditioned(raw: Json) -> StatusSnapshot {
    let doc: ConditionedDoc = match serde_json::from_value(raw) {
        Ok(d) => d,
        Err(e) => return StatusSnapshot::malformed(format!("status: {}", e)),
    };
    let reported = doc.status.is_some();
    let (observed_generation, conditions) = match doc.status {
        Some(s) => (s.observed_generation, s.conditions),
        None => (None, Vec::new()),
    };
    StatusSnapshot::Conditioned(ConditionedStatus {
        status_reported: reported,
        generation: doc.metadata.generation,
        observed_generation,
        conditions: conditions.into_iter().collect(),
    })
}

#[derive(Debug, Deserialize)]
struct AppDoc {
    #[serde(default)]
    status: Option<AppStatusDoc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppStatusDoc {
    #[serde(default)]
    sync: Option<AppSyncDoc>,
    #[serde(default)]
    health: Option<AppHealthDoc>,
    #[serde(default)]
    operation_state: Option<AppOperationDoc>,
    #[serde(default)]
    resources: Vec<AppResourceDoc>,
    #[serde(default)]
    conditions: Vec<AppConditionDoc>,
}

#[derive(Debug, Default, Deserialize)]
struct AppSyncDoc {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AppHealthDoc {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AppOperationDoc {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AppResourceDoc {
    kind: String,
    #[serde(default)]
    namespace: Option<String>,
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    health: Option<AppHealthDoc>,
}

#[derive(Debug, Deserialize)]
struct AppConditionDoc {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    message: Option<String>,
}

fn decode_application(raw: Json) -> StatusSnapshot {
    let doc: AppDoc = match serde_json::from_value(raw) {
        Ok(d) => d,
        Err(e) => return StatusSnapshot::malformed(format!("Application: {}", e)),
    };
    let reported = doc.status.is_some();
    let s = doc.status.unwrap_or_default();
    let (health, health_message) = match s.health {
        Some(h) => (h.status, h.message),
        None => (None, None),
    };
    let (operation_phase, operation_message) = match s.operation_state {
        Some(op) => (op.phase, op.message),
        None => (None, None),
    };
    let resources = s
        .resources
        .into_iter()
        .map(|r| {
            let (health, health_message) = match r.health {
                Some(h) => (h.status, h.message),
                None => (None, None),
            };
            AppResource { kind: r.kind, namespace: r.namespace, name: r.name, sync: r.status, health, health_message }
        })
        .collect();
    // Argo lists only active conditions; presence means the condition holds.
    let conditions = s
        .conditions
        .into_iter()
        .map(|c| Condition { type_: c.type_, status: "True".to_string(), reason: None, message: c.message })
        .collect();
    StatusSnapshot::Sync(SyncStatus {
        status_reported: reported,
        sync: s.sync.and_then(|x| x.status),
        health,
        health_message,
        operation_phase,
        operation_message,
        resources,
        conditions,
    })
}

pub fn pod_summary(pod: &Pod) -> PodSummary {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let status = pod.status.as_ref();
    let phase = status.and_then(|s| s.phase.clone()).unwrap_or_else(|| "Unknown".to_string());
    let conditions = status.and_then(|s| s.conditions.as_ref());
    let ready = conditions.map(|cs| cs.iter().any(|c| c.type_ == "Ready" && c.status == "True")).unwrap_or(false);
    let message = conditions
        .and_then(|cs| cs.iter().find(|c| c.type_ == "PodScheduled" && c.status == "False"))
        .and_then(|c| c.message.clone());

    let mut container_reasons = Vec::new();
    let mut restarts = 0;
    let statuses = status
        .into_iter()
        .flat_map(|s| s.init_container_statuses.iter().flatten().chain(s.container_statuses.iter().flatten()));
    for cs in statuses {
        restarts += cs.restart_count;
        let state = cs.state.as_ref();
        if let Some(reason) = state.and_then(|st| st.waiting.as_ref()).and_then(|w| w.reason.clone()) {
            container_reasons.push(reason);
        } else if let Some(reason) = state.and_then(|st| st.terminated.as_ref()).and_then(|t| t.reason.clone()) {
            if reason != "Completed" { container_reasons.push(reason); }
        }
    }

    let claims = pod
        .spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .map(|vs| vs.iter().filter_map(|v| v.persistent_volume_claim.as_ref().map(|c| c.claim_name.clone())).collect())
        .unwrap_or_default();

    PodSummary { name, phase, ready, container_reasons, restarts, claims, message }
}

pub fn claim_summary(pvc: &PersistentVolumeClaim) -> ClaimSummary {
    ClaimSummary {
        name: pvc.metadata.name.clone().unwrap_or_default(),
        phase: pvc.status.as_ref().and_then(|s| s.phase.clone()).unwrap_or_else(|| "Pending".to_string()),
        storage_class: pvc.spec.as_ref().and_then(|s| s.storage_class_name.clone()),
    }
}

pub fn event_summary(ev: &Event) -> EventSummary {
    let obj = &ev.involved_object;
    let last_seen = ev
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| ev.event_time.as_ref().map(|t| t.0))
        .or_else(|| ev.metadata.creation_timestamp.as_ref().map(|t| t.0));
    EventSummary {
        reason: ev.reason.clone().unwrap_or_default(),
        object: format!("{}/{}", obj.kind.as_deref().unwrap_or("?"), obj.name.as_deref().unwrap_or("?")),
        message: ev.message.clone().unwrap_or_default().trim().to_string(),
        count: ev.count.unwrap_or(1),
        last_seen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deployment_decodes_counts_and_selector() {
        let raw = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "argocd-server", "namespace": "argocd", "generation": 3},
            "spec": {
                "replicas": 2,
                "selector": {"matchLabels": {"app.kubernetes.io/name": "argocd-server"}},
                "template": {"spec": {"containers": [{"name": "server", "image": "argocd"}]}}
            },
            "status": {
                "observedGeneration": 3,
                "replicas": 2,
                "readyReplicas": 1,
                "updatedReplicas": 2,
                "availableReplicas": 1,
                "conditions": [
                    {"type": "Available", "status": "False", "reason": "MinimumReplicasUnavailable"}
                ]
            }
        });
        let snap = decode_snapshot(&ResourceKind::Deployment, raw);
        let StatusSnapshot::Workload(w) = snap else { panic!("expected workload, got {:?}", snap) };
        assert!(w.status_reported);
        assert_eq!(w.desired, 2);
        assert_eq!(w.ready, 1);
        assert_eq!(w.updated, 2);
        assert_eq!(w.selector.as_deref(), Some("app.kubernetes.io/name=argocd-server"));
        assert_eq!(w.conditions.len(), 1);
        assert!(w.generation_observed());
    }

    #[test]
    fn deployment_without_status_is_unreported() {
        let raw = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "x", "generation": 1},
            "spec": {"selector": {}, "template": {}}
        });
        let StatusSnapshot::Workload(w) = decode_snapshot(&ResourceKind::Deployment, raw) else { panic!("expected workload") };
        assert!(!w.status_reported);
        assert_eq!(w.desired, 1);
        assert!(!w.generation_observed());
    }

    #[test]
    fn statefulset_collects_claim_templates() {
        let raw = json!({
            "apiVersion": "apps/v1",
            "kind": "StatefulSet",
            "metadata": {"name": "nats", "generation": 1},
            "spec": {
                "replicas": 3,
                "serviceName": "nats",
                "selector": {"matchLabels": {"app": "nats"}},
                "template": {},
                "volumeClaimTemplates": [{"metadata": {"name": "data"}}]
            },
            "status": {"replicas": 3, "readyReplicas": 3, "observedGeneration": 1}
        });
        let StatusSnapshot::Workload(w) = decode_snapshot(&ResourceKind::StatefulSet, raw) else { panic!("expected workload") };
        assert_eq!(w.claim_templates, vec!["data".to_string()]);
        assert_eq!(w.ready, 3);
        assert_eq!(w.updated, 0);
    }

    #[test]
    fn daemonset_uses_scheduled_counts() {
        let raw = json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": {"name": "cilium"},
            "spec": {"selector": {"matchLabels": {"k8s-app": "cilium"}}, "template": {}},
            "status": {
                "currentNumberScheduled": 3,
                "desiredNumberScheduled": 3,
                "numberMisscheduled": 0,
                "numberReady": 2,
                "updatedNumberScheduled": 3,
                "numberAvailable": 2
            }
        });
        let StatusSnapshot::Workload(w) = decode_snapshot(&ResourceKind::DaemonSet, raw) else { panic!("expected workload") };
        assert_eq!((w.desired, w.ready, w.updated, w.available), (3, 2, 3, 2));
    }

    #[test]
    fn application_decodes_sync_health_and_resources() {
        let raw = json!({
            "metadata": {"name": "platform-apis"},
            "status": {
                "sync": {"status": "Synced"},
                "health": {"status": "Degraded", "message": "one resource degraded"},
                "operationState": {"phase": "Failed", "message": "hook failed"},
                "resources": [
                    {"kind": "Deployment", "namespace": "apis", "name": "gateway", "status": "Synced",
                     "health": {"status": "Degraded", "message": "Deployment exceeded its progress deadline"}}
                ],
                "conditions": [{"type": "SyncError", "message": "boom"}]
            }
        });
        let StatusSnapshot::Sync(s) = decode_snapshot(&ResourceKind::Application, raw) else { panic!("expected sync") };
        assert_eq!(s.sync.as_deref(), Some("Synced"));
        assert_eq!(s.health.as_deref(), Some("Degraded"));
        assert_eq!(s.operation_phase.as_deref(), Some("Failed"));
        assert_eq!(s.resources[0].id(), "Deployment/apis/gateway");
        assert_eq!(s.conditions[0].type_, "SyncError");
        assert!(s.conditions[0].is_true());
    }

    #[test]
    fn conditioned_decodes_generation_and_conditions() {
        let raw = json!({
            "metadata": {"name": "db-creds", "generation": 2},
            "status": {
                "conditions": [{"type": "Ready", "status": "False", "reason": "SecretSyncedError", "message": "could not get secret"}]
            }
        });
        let StatusSnapshot::Conditioned(c) = decode_snapshot(&ResourceKind::ExternalSecret, raw) else { panic!("expected conditioned") };
        assert!(c.status_reported);
        assert_eq!(c.generation, Some(2));
        assert_eq!(c.condition("Ready").and_then(|x| x.reason.as_deref()), Some("SecretSyncedError"));
    }

    #[test]
    fn malformed_documents_do_not_decode_to_empty_fields() {
        let raw = json!({"metadata": {"name": "x"}, "status": {"conditions": "not-a-list"}});
        assert!(matches!(decode_snapshot(&ResourceKind::ExternalSecret, raw), StatusSnapshot::Malformed { .. }));

        let raw = json!({"metadata": {"name": "x"}, "status": {"conditions": [{"status": "True"}]}});
        assert!(matches!(decode_snapshot(&ResourceKind::ExternalSecret, raw), StatusSnapshot::Malformed { .. }));

        let raw = json!({"apiVersion": "apps/v1", "kind": "Deployment", "spec": {"replicas": "three"}});
        assert!(matches!(decode_snapshot(&ResourceKind::Deployment, raw), StatusSnapshot::Malformed { .. }));
    }

    #[test]
    fn pod_summary_collects_reasons_and_claims() {
        let pod: Pod = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "nats-0"},
            "spec": {
                "containers": [{"name": "nats"}],
                "volumes": [{"name": "data", "persistentVolumeClaim": {"claimName": "data-nats-0"}}]
            },
            "status": {
                "phase": "Running",
                "conditions": [{"type": "Ready", "status": "False"}],
                "containerStatuses": [{
                    "name": "nats", "image": "nats", "imageID": "", "ready": false, "restartCount": 4,
                    "state": {"waiting": {"reason": "CrashLoopBackOff"}}
                }]
            }
        }))
        .expect("pod");
        let p = pod_summary(&pod);
        assert_eq!(p.name, "nats-0");
        assert!(!p.is_running_and_ready());
        assert_eq!(p.restarts, 4);
        assert_eq!(p.failure_reason(), Some("CrashLoopBackOff"));
        assert_eq!(p.claims, vec!["data-nats-0".to_string()]);
    }
}
