//! # Local Acceptance Tests
//!
//! Two-phase contract for litmus modules: kick-off writes `acc.sh` into the
//! module and runs it detached, teeing into `litmusacceptance.out`; a later
//! fetch reads the tail of that file and classifies the run.

use super::terminal::{self, BackgroundHandle};
use crate::error::Result;
use crate::state::provision::is_litmus_module;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ACCEPTANCE_SCRIPT: &str = "acc.sh";
pub const ACCEPTANCE_OUTPUT: &str = "litmusacceptance.out";

const TAIL_LINES: usize = 10;

/// Classification of a local acceptance run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LocalTestStatus {
    Success,
    Failed,
    Progress,
}

impl std::fmt::Display for LocalTestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LocalTestStatus::Success => "SUCCESS",
            LocalTestStatus::Failed => "FAILED",
            LocalTestStatus::Progress => "PROGRESS",
        };
        f.write_str(s)
    }
}

/// Shell script that provisions, installs and runs the acceptance suite.
pub fn acceptance_script(
    module_dir: &Path,
    provision_type: &str,
    puppet_collection: Option<&str>,
) -> String {
    let mut script = String::from("#!/bin/sh\n");
    if let Some(collection) = puppet_collection {
        script.push_str(&format!("export PUPPET_GEM_VERSION='~> {}'\n", collection));
    }
    let dir = module_dir.display();
    script.push_str(&format!(
        "rm -rf {0}/Gemfile.lock;rm -rf {0}/.bundle\n",
        dir
    ));
    script.push_str("bundle install --path .bundle/gems/ --jobs 4\n");
    script.push_str(&format!(
        "bundle exec rake 'litmus:provision_list[{}]'\n",
        provision_type
    ));
    script.push_str("bundle exec rake litmus:install_agent\n");
    script.push_str("bundle exec rake litmus:install_module\n");
    script.push_str("bundle exec rake litmus:acceptance:parallel\n");
    script.push_str("bundle exec rake litmus:tear_down\n");
    script
}

/// Kick off the suite in the background. Non-litmus modules are skipped
/// with a warning and yield `None`.
pub fn run_tests_locally(
    module_dir: &Path,
    module: &str,
    provision_type: &str,
    puppet_collection: Option<&str>,
) -> Result<Option<BackgroundHandle>> {
    if !is_litmus_module(module_dir) {
        tracing::warn!(module = %module, "Executing testcases locally supports only for litmus");
        return Ok(None);
    }

    let script_path = module_dir.join(ACCEPTANCE_SCRIPT);
    std::fs::write(
        &script_path,
        acceptance_script(module_dir, provision_type, puppet_collection),
    )?;
    make_executable(&script_path)?;

    let command = format!("sh {} 2>&1 | tee {}", ACCEPTANCE_SCRIPT, ACCEPTANCE_OUTPUT);
    let handle = terminal::spawn_background(module_dir, &command)?;
    tracing::info!(
        module = %module,
        pid = handle.pid,
        "Kicked off acceptance tests. Results will be available in {}",
        module_dir.join(ACCEPTANCE_OUTPUT).display()
    );
    Ok(Some(handle))
}

/// Classify the last lines of an acceptance run.
///
/// A finished run (any line mentions `exit`) is FAILED or SUCCESS; an
/// unfinished one is FAILED on an obvious abort, otherwise PROGRESS.
pub fn classify(tail: &[&str]) -> LocalTestStatus {
    let failed = tail
        .iter()
        .any(|l| l.starts_with("Failed") || l.contains("--trace"));
    let finished = tail.iter().any(|l| l.contains("exit"));

    if finished {
        if failed {
            LocalTestStatus::Failed
        } else {
            LocalTestStatus::Success
        }
    } else if failed || tail.iter().any(|l| l.contains("rake aborted")) {
        LocalTestStatus::Failed
    } else {
        LocalTestStatus::Progress
    }
}

/// Read and classify `litmusacceptance.out`. A missing file counts as FAILED.
pub fn fetch_test_results(module_dir: &Path, module: &str) -> (LocalTestStatus, PathBuf) {
    if !is_litmus_module(module_dir) {
        tracing::warn!(module = %module, "Fetching test results locally supports only for litmus");
    }
    let output = module_dir.join(ACCEPTANCE_OUTPUT);
    let status = match std::fs::read_to_string(&output) {
        Ok(contents) => {
            let lines: Vec<&str> = contents.lines().collect();
            let start = lines.len().saturating_sub(TAIL_LINES);
            classify(&lines[start..])
        }
        Err(e) => {
            tracing::error!(module = %module, "Unable to read {}: {}", output.display(), e);
            LocalTestStatus::Failed
        }
    };
    (status, output)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
