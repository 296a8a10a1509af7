//! Stage plans: an ordered list of waves read from YAML.
//!
//! ```yaml
//! interval: 5s
//! lenient: [grafana, monitoring/loki]
//! stages:
//!   - name: databases
//!     timeout: 10m
//!     onFailure: failFast
//!     required: [Cluster.v1.postgresql.cnpg.io/db/pg]
//!     optional: [deploy/db/pgadmin]
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use keel_core::ResourceRef;
use serde::{Deserialize, Serialize};

use crate::config::{format_duration, parse_duration, parse_ignore_list, ConfigError, IgnoreRule};

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("reading plan {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("parsing plan: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("plan has no stages")]
    Empty,
    #[error("duplicate stage name {0:?}")]
    DuplicateStage(String),
    #[error("unknown stage {name:?}; known stages: {known}")]
    UnknownStage { name: String, known: String },
    #[error("stage {stage:?}: {source}")]
    Stage { stage: String, source: ConfigError },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailurePolicy {
    /// Abort the run; later stages never start.
    #[default]
    FailFast,
    /// Record the failure and continue.
    Warn,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailurePolicy::FailFast => "failFast",
            FailurePolicy::Warn => "warn",
        })
    }
}

/// One wave as written in the plan file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StageSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub required: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional: Vec<ResourceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Names treated as optional under non-production profiles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lenient: Vec<String>,
    pub stages: Vec<StageSpec>,
}

/// A resolved stage, ready to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub name: String,
    pub required: Vec<ResourceRef>,
    pub optional: Vec<ResourceRef>,
    #[serde(serialize_with = "duration_str")]
    pub timeout: Duration,
    pub on_failure: FailurePolicy,
}

fn duration_str<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> { s.collect_str(&format_duration(*d)) }

impl Stage {
    /// Required refs followed by optional ones, the latter marked optional.
    pub fn refs(&self) -> Vec<ResourceRef> {
        self.required.iter().cloned().chain(self.optional.iter().cloned().map(ResourceRef::optional)).collect()
    }
}

impl Plan {
    pub fn from_yaml(text: &str) -> Result<Self, PlanError> {
        let plan: Plan = serde_yaml::from_str(text)?;
        plan.check()?;
        Ok(plan)
    }

    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path).map_err(|source| PlanError::Read { path: path.display().to_string(), source })?;
        Self::from_yaml(&text)
    }

    fn check(&self) -> Result<(), PlanError> {
        if self.stages.is_empty() { return Err(PlanError::Empty); }
        let mut seen = std::collections::HashSet::new();
        for s in &self.stages {
            if !seen.insert(s.name.as_str()) { return Err(PlanError::DuplicateStage(s.name.clone())); }
        }
        Ok(())
    }

    pub fn interval(&self) -> Result<Option<Duration>, PlanError> {
        Ok(self.interval.as_deref().map(parse_duration).transpose()?)
    }

    pub fn lenient_rules(&self) -> Result<Vec<IgnoreRule>, PlanError> {
        Ok(parse_ignore_list(&self.lenient.join(","))?)
    }

    /// Resolve every stage; stages without a timeout get `default_timeout`.
    pub fn stages(&self, default_timeout: Duration) -> Result<Vec<Stage>, PlanError> {
        self.stages
            .iter()
            .map(|s| {
                let timeout = match s.timeout.as_deref() {
                    Some(t) => parse_duration(t).map_err(|source| PlanError::Stage { stage: s.name.clone(), source })?,
                    None => default_timeout,
                };
                if timeout.is_zero() {
                    return Err(PlanError::Stage { stage: s.name.clone(), source: ConfigError::Zero("timeout") });
                }
                Ok(Stage {
                    name: s.name.clone(),
                    required: s.required.clone(),
                    optional: s.optional.clone(),
                    timeout,
                    on_failure: s.on_failure,
                })
            })
            .collect()
    }
}

/// Index of `name` in `stages`.
pub fn stage_index(stages: &[Stage], name: &str) -> Result<usize, PlanError> {
    stages.iter().position(|s| s.name == name).ok_or_else(|| PlanError::UnknownStage {
        name: name.to_string(),
        known: stages.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", "),
    })
}
