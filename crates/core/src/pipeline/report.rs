//! # Run Report
//!
//! What a run leaves behind: per-module step records, the pull requests
//! opened in processing order, test-result rows and any detached test
//! suites still running.

use super::steps::Step;
use crate::tools::terminal::BackgroundHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Result of one step for one module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    /// Nothing to do; later steps still run
    Skipped,
    /// Logged failure; later steps still run unless the module was stopped
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub status: StepStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Everything that happened to one module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOutcome {
    pub module: String,
    pub steps: Vec<StepRecord>,
    /// Why the remaining steps were not run, if they were not
    #[serde(default)]
    pub stopped: Option<String>,
}

impl ModuleOutcome {
    pub fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, step: Step, status: StepStatus, detail: Option<String>) {
        self.steps.push(StepRecord {
            step,
            status,
            detail,
        });
    }

    /// Status of `step`, if it ran
    pub fn status_of(&self, step: Step) -> Option<StepStatus> {
        self.steps.iter().find(|r| r.step == step).map(|r| r.status)
    }

    pub fn stop(&mut self, reason: impl Into<String>) {
        self.stopped = Some(reason.into());
    }
}

/// One line of the test-results table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRow {
    pub module: String,
    pub status: String,
    pub detail: String,
}

/// How the batch ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunOutcome {
    Completed,
    /// A systemic failure stopped the batch
    Aborted {
        step: Step,
        module: String,
        reason: String,
    },
}

/// Aggregate over the whole batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub modules: Vec<ModuleOutcome>,
    /// Created pull request URLs in processing order
    pub pull_requests: Vec<String>,
    pub test_rows: Vec<TestRow>,
    /// Suites started in background mode; poll their output files later
    pub background: Vec<BackgroundHandle>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            outcome: RunOutcome::Completed,
            modules: Vec::new(),
            pull_requests: Vec::new(),
            test_rows: Vec::new(),
            background: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

impl RunReport {
    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }

    pub fn module(&self, name: &str) -> Option<&ModuleOutcome> {
        self.modules.iter().find(|m| m.module == name)
    }

    /// Mark the batch as stopped by `step` on `module`.
    pub fn abort(&mut self, step: Step, module: &str, reason: impl Into<String>) {
        self.outcome = RunOutcome::Aborted {
            step,
            module: module.to_string(),
            reason: reason.into(),
        };
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// One created pull request URL per line
    pub fn render_pull_requests(&self) -> String {
        if self.pull_requests.is_empty() {
            return "No pull requests were created.\n".to_string();
        }
        let mut out = String::from("The following pull requests were created:\n");
        for url in &self.pull_requests {
            let _ = writeln!(out, "  {}", url);
        }
        out
    }

    /// Module / status / detail table, column widths fitted to the rows
    pub fn render_test_table(&self) -> String {
        let headers = ("MODULE_NAME", "STATUS", "RESULT");
        let module_w = self
            .test_rows
            .iter()
            .map(|r| r.module.len())
            .chain(std::iter::once(headers.0.len()))
            .max()
            .unwrap_or_default();
        let status_w = self
            .test_rows
            .iter()
            .map(|r| r.status.len())
            .chain(std::iter::once(headers.1.len()))
            .max()
            .unwrap_or_default();

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<mw$}  {:<sw$}  {}",
            headers.0,
            headers.1,
            headers.2,
            mw = module_w,
            sw = status_w
        );
        for row in &self.test_rows {
            let _ = writeln!(
                out,
                "{:<mw$}  {:<sw$}  {}",
                row.module,
                row.status,
                row.detail,
                mw = module_w,
                sw = status_w
            );
        }
        out
    }
}
