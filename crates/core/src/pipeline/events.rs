//! # Run Events
//!
//! Progress events emitted by the orchestrator. A front-end can subscribe
//! through [`Orchestrator::with_event_channel`](super::Orchestrator::with_event_channel).

use super::steps::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of run event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    /// Batch started
    RunStarted,
    /// Processing of one module started
    ModuleStarted,
    /// Step completed
    StepCompleted,
    /// Step had nothing to do (no diff, not applicable)
    StepSkipped,
    /// Step failed; the batch continues
    StepFailed,
    /// A pull request was opened
    PullRequestCreated,
    /// Module finished, successfully or not
    ModuleFinished,
    /// Every module processed
    RunCompleted,
    /// The batch was stopped early
    RunAborted,
}

/// An event in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Position in the run, starting at 1
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: SyncEventKind,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub step: Option<Step>,
    /// Free-form detail (PR URL, skip reason, error text)
    #[serde(default)]
    pub detail: Option<String>,
}

impl SyncEvent {
    pub fn new(kind: SyncEventKind) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            kind,
            module: None,
            step: None,
            detail: None,
        }
    }

    pub fn for_module(mut self, module: &str) -> Self {
        self.module = Some(module.to_string());
        self
    }

    pub fn for_step(mut self, step: Step) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
