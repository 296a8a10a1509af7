//! Keel wait: the readiness engine.
//!
//! [`retry`] wraps single control-plane calls, [`Poller`] drives one wave to
//! convergence or timeout, and [`Sequencer`] runs a [`Plan`] of waves in order.

#![forbid(unsafe_code)]

pub mod config;
pub mod plan;
pub mod poller;
pub mod report;
pub mod retry;
pub mod sequencer;

pub use config::{parse_duration, parse_ignore_list, parse_profile, ConfigError, IgnoreRule, PollConfig};
pub use plan::{FailurePolicy, Plan, PlanError, Stage};
pub use poller::{PollOutcome, PollStatus, Poller, ResourceReport, TickReport};
pub use report::{render_report, render_run, ConsoleReporter, NullSink, ProgressSink};
pub use retry::{retry_with_backoff, RetryPolicy, Retryable};
pub use sequencer::{RunReport, Sequencer, StageReport, StageState};
