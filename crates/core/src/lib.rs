//! Keel core types: what to wait on, what was observed, and how it was judged.
//!
//! Nothing in this crate performs I/O. Snapshots are decoded by `keel-kubehub`
//! and classified by `keel-health`.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

mod evidence;
mod health;
mod reference;
mod snapshot;

pub use evidence::{ClaimSummary, EventSummary, Evidence, EvidenceRequest, PodSummary};
pub use health::{Classification, DiagnosticFinding, FindingCategory, Health, Severity};
pub use reference::{RefParseError, ResourceKind, ResourceRef, CLUSTER_SCOPE};
pub use snapshot::{
    AppResource, Condition, ConditionedStatus, StatusSnapshot, SyncStatus, WorkloadStatus,
};

pub mod prelude {
    pub use super::{
        Classification, DiagnosticFinding, Evidence, FindingCategory, Health, Profile,
        ResourceKind, ResourceRef, Severity, StatusSnapshot,
    };
}

/// Environment profile. Non-production profiles widen the optional allow-list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Production,
    Preview,
    Dev,
}

impl Profile {
    pub fn is_lenient(self) -> bool { !matches!(self, Profile::Production) }

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Production => "production",
            Profile::Preview => "preview",
            Profile::Dev => "dev",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown profile: {0} (expect production, preview or dev)")]
pub struct ProfileParseError(pub String);

impl std::str::FromStr for Profile {
    type Err = ProfileParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Profile::Production),
            "preview" | "staging" => Ok(Profile::Preview),
            "dev" | "development" | "local" => Ok(Profile::Dev),
            other => Err(ProfileParseError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}
