//! Stage sequencer: run waves strictly in order, each gated on the previous one.

use std::fmt;

use metrics::counter;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::PollConfig;
use crate::plan::{stage_index, FailurePolicy, PlanError, Stage};
use crate::poller::{PollOutcome, PollStatus, Poller};
use crate::report::ProgressSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    SucceededWithWarnings,
    Failed,
    /// Before the `--start-at` stage.
    Skipped,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageState::Pending => "pending",
            StageState::Running => "running",
            StageState::Succeeded => "succeeded",
            StageState::SucceededWithWarnings => "succeeded-with-warnings",
            StageState::Failed => "failed",
            StageState::Skipped => "skipped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub name: String,
    pub state: StageState,
    pub policy: FailurePolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PollOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub stages: Vec<StageReport>,
}

impl RunReport {
    /// No stage failed. Warn-policy failures count as success.
    pub fn is_success(&self) -> bool { !self.stages.iter().any(|s| s.state == StageState::Failed) }

    pub fn failed_stage(&self) -> Option<&StageReport> { self.stages.iter().find(|s| s.state == StageState::Failed) }
}

pub struct Sequencer<'a> {
    poller: Poller<'a>,
    base: PollConfig,
}

impl<'a> Sequencer<'a> {
    /// `base` supplies interval, ignore rules, profile and retry; each stage
    /// overrides the timeout.
    pub fn new(poller: Poller<'a>, base: PollConfig) -> Self { Self { poller, base } }

    pub async fn run(&self, stages: &[Stage], start_at: Option<&str>, sink: &mut dyn ProgressSink) -> Result<RunReport, PlanError> {
        let first = match start_at {
            Some(name) => stage_index(stages, name)?,
            None => 0,
        };
        let mut reports: Vec<StageReport> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| StageReport {
                name: s.name.clone(),
                state: if i < first { StageState::Skipped } else { StageState::Pending },
                policy: s.on_failure,
                outcome: None,
            })
            .collect();
        if first > 0 {
            info!(start_at = %stages[first].name, skipped = first, "resuming bootstrap");
        }

        for (i, stage) in stages.iter().enumerate().skip(first) {
            reports[i].state = StageState::Running;
            sink.stage_started(&stage.name, i, stages.len());
            info!(stage = %stage.name, index = i + 1, total = stages.len(), timeout_s = stage.timeout.as_secs(), "stage started");

            let config = self.base.clone().with_timeout(stage.timeout);
            let outcome = self.poller.wait_for(&stage.refs(), &config, sink).await;
            let state = match (outcome.status, stage.on_failure) {
                (PollStatus::Converged, _) => StageState::Succeeded,
                (PollStatus::ConvergedWithWarnings, _) => StageState::SucceededWithWarnings,
                (_, FailurePolicy::Warn) => {
                    warn!(stage = %stage.name, "stage did not converge; continuing (policy warn)");
                    StageState::SucceededWithWarnings
                }
                (_, FailurePolicy::FailFast) => {
                    error!(stage = %stage.name, "stage did not converge; aborting run");
                    StageState::Failed
                }
            };
            counter!("keel_stage_total", 1, "stage" => stage.name.clone(), "state" => state.to_string());
            reports[i].state = state;
            reports[i].outcome = Some(outcome);
            sink.stage_finished(&reports[i]);
            if state == StageState::Failed { break; }
        }
        Ok(RunReport { stages: reports })
    }
}
