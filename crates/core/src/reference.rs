use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of resource a [`ResourceRef`] points at.
///
/// Builtin variants have dedicated classification rules; anything else is
/// carried as `Custom` and handled by the generic condition rules unless a
/// strategy is registered for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    ExternalSecret,
    Application,
    Custom { group: String, version: String, kind: String },
}

impl ResourceKind {
    /// Registry key: the Kind name for builtins, `Kind.group` for custom kinds.
    pub fn key(&self) -> String {
        match self {
            ResourceKind::Custom { group, kind, .. } => format!("{}.{}", kind, group),
            other => other.kind_name().to_string(),
        }
    }

    pub fn kind_name(&self) -> &str {
        match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::ExternalSecret => "ExternalSecret",
            ResourceKind::Application => "Application",
            ResourceKind::Custom { kind, .. } => kind,
        }
    }

    /// `(group, version)` as served by the API server.
    pub fn group_version(&self) -> (&str, &str) {
        match self {
            ResourceKind::Deployment | ResourceKind::StatefulSet | ResourceKind::DaemonSet => ("apps", "v1"),
            ResourceKind::ExternalSecret => ("external-secrets.io", "v1beta1"),
            ResourceKind::Application => ("argoproj.io", "v1alpha1"),
            ResourceKind::Custom { group, version, .. } => (group, version),
        }
    }

    /// Name accepted by `kubectl get <name>`.
    pub fn kubectl_name(&self) -> String {
        match self {
            ResourceKind::Custom { group, kind, .. } => format!("{}.{}", kind.to_ascii_lowercase(), group),
            other => other.kind_name().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Custom { group, version, kind } => write!(f, "{}.{}.{}", kind, version, group),
            other => f.write_str(&other.kind_name().to_ascii_lowercase()),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = RefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" | "deployments" | "deploy" => return Ok(ResourceKind::Deployment),
            "statefulset" | "statefulsets" | "sts" => return Ok(ResourceKind::StatefulSet),
            "daemonset" | "daemonsets" | "ds" => return Ok(ResourceKind::DaemonSet),
            "externalsecret" | "externalsecrets" | "es" => return Ok(ResourceKind::ExternalSecret),
            "application" | "applications" | "app" => return Ok(ResourceKind::Application),
            _ => {}
        }
        // Kind.version.group, e.g. Cluster.v1.postgresql.cnpg.io
        let mut parts = s.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(version), Some(group)) if !kind.is_empty() && !version.is_empty() && !group.is_empty() => {
                Ok(ResourceKind::Custom { group: group.to_string(), version: version.to_string(), kind: kind.to_string() })
            }
            _ => Err(RefParseError::UnknownKind(s.to_string())),
        }
    }
}

impl Serialize for ResourceKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefParseError {
    #[error("unknown kind: {0} (expect a builtin alias such as deploy/sts/ds/es/app, or Kind.version.group)")]
    UnknownKind(String),
    #[error("invalid resource reference: {0} (expect kind/namespace/name or kind/name)")]
    Shape(String),
    #[error("resource reference {0} has no namespace and no default namespace was given")]
    NoNamespace(String),
    #[error("resource reference {0} is cluster-scoped but its kind is namespaced")]
    NamespacedKind(String),
}

/// Namespace segment marking a cluster-scoped ref, as in `Kind.v1.group/_/name`.
pub const CLUSTER_SCOPE: &str = "_";

/// Identifies one thing to wait on. Immutable once built.
///
/// An empty `namespace` means the object is cluster-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub optional: bool,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.into(), name: name.into(), optional: false }
    }

    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self { Self::new(kind, "", name) }

    pub fn is_cluster_scoped(&self) -> bool { self.namespace.is_empty() }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Parse `kind/namespace/name` or `kind/name`; a trailing `?` marks the ref optional.
    /// A namespace of `_` marks a cluster-scoped custom resource.
    pub fn parse(input: &str, default_namespace: Option<&str>) -> Result<Self, RefParseError> {
        let trimmed = input.trim();
        let (body, optional) = match trimmed.strip_suffix('?') {
            Some(b) => (b, true),
            None => (trimmed, false),
        };
        let parts: Vec<&str> = body.split('/').collect();
        let (kind, namespace, name) = match parts.as_slice() {
            [kind, ns, name] => (*kind, (*ns).to_string(), *name),
            [kind, name] => match default_namespace {
                Some(ns) => (*kind, ns.to_string(), *name),
                None => return Err(RefParseError::NoNamespace(input.to_string())),
            },
            _ => return Err(RefParseError::Shape(input.to_string())),
        };
        if kind.is_empty() || namespace.is_empty() || name.is_empty() {
            return Err(RefParseError::Shape(input.to_string()));
        }
        let kind: ResourceKind = kind.parse()?;
        let namespace = if namespace == CLUSTER_SCOPE {
            // Every builtin kind is namespaced.
            if !matches!(kind, ResourceKind::Custom { .. }) {
                return Err(RefParseError::NamespacedKind(input.to_string()));
            }
            String::new()
        } else {
            namespace
        };
        Ok(Self { kind, namespace, name: name.to_string(), optional })
    }

    /// `namespace/name`, or just `name` when cluster-scoped.
    pub fn key(&self) -> String {
        if self.is_cluster_scoped() { self.name.clone() } else { format!("{}/{}", self.namespace, self.name) }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = if self.is_cluster_scoped() { CLUSTER_SCOPE } else { self.namespace.as_str() };
        write!(f, "{}/{}/{}", self.kind, ns, self.name)?;
        if self.optional { f.write_str("?")?; }
        Ok(())
    }
}

impl FromStr for ResourceRef {
    type Err = RefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s, None) }
}

impl Serialize for ResourceRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_builtin_aliases() {
        assert_eq!("deploy".parse::<ResourceKind>().expect("ok"), ResourceKind::Deployment);
        assert_eq!("StatefulSet".parse::<ResourceKind>().expect("ok"), ResourceKind::StatefulSet);
        assert_eq!("es".parse::<ResourceKind>().expect("ok"), ResourceKind::ExternalSecret);
    }

    #[test]
    fn parses_custom_kind() {
        let k: ResourceKind = "Cluster.v1.postgresql.cnpg.io".parse().expect("ok");
        assert_eq!(k, ResourceKind::Custom { group: "postgresql.cnpg.io".into(), version: "v1".into(), kind: "Cluster".into() });
        assert_eq!(k.to_string(), "Cluster.v1.postgresql.cnpg.io");
        assert_eq!(k.key(), "Cluster.postgresql.cnpg.io");
        assert_eq!(k.kubectl_name(), "cluster.postgresql.cnpg.io");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!("widget".parse::<ResourceKind>(), Err(RefParseError::UnknownKind(_))));
    }

    #[test]
    fn parses_full_and_short_refs() {
        let r = ResourceRef::parse("deploy/argocd/argocd-server", None).expect("ok");
        assert_eq!(r.kind, ResourceKind::Deployment);
        assert_eq!(r.key(), "argocd/argocd-server");
        assert!(!r.optional);

        let r = ResourceRef::parse("sts/nats?", Some("messaging")).expect("ok");
        assert_eq!(r.namespace, "messaging");
        assert!(r.optional);
        assert_eq!(r.to_string(), "statefulset/messaging/nats?");
    }

    #[test]
    fn short_ref_without_default_namespace_fails() {
        assert!(matches!(ResourceRef::parse("deploy/x", None), Err(RefParseError::NoNamespace(_))));
        assert!(matches!(ResourceRef::parse("deploy", None), Err(RefParseError::Shape(_))));
        assert!(matches!(ResourceRef::parse("deploy//x", None), Err(RefParseError::Shape(_))));
    }

    #[test]
    fn cluster_scoped_refs() {
        let r = ResourceRef::parse("ClusterSecretStore.v1beta1.external-secrets.io/_/vault", Some("ignored")).expect("ok");
        assert!(r.is_cluster_scoped());
        assert_eq!(r.namespace, "");
        assert_eq!(r.key(), "vault");
        assert_eq!(r.to_string(), "ClusterSecretStore.v1beta1.external-secrets.io/_/vault");
        assert_eq!(r.to_string().parse::<ResourceRef>().expect("ok"), r);
        assert!(matches!(ResourceRef::parse("deploy/_/api", None), Err(RefParseError::NamespacedKind(_))));
    }

    #[test]
    fn display_round_trips_through_parse() {
        let r = ResourceRef::new("Cluster.v1.postgresql.cnpg.io".parse().expect("kind"), "databases", "main").optional();
        let back: ResourceRef = r.to_string().parse().expect("ok");
        assert_eq!(back, r);
    }
}
