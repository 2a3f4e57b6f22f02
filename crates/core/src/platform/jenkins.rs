//! # Jenkins
//!
//! Triggers the parameterised adhoc job for a module branch and later walks
//! the job's downstream projects to collect a result per build.
//!
//! The trigger is recorded in `jenkins_job.json` inside the module directory
//! so results can be fetched by a separate run.

use super::ensure_success;
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// Where a triggered job is recorded, relative to the module directory
pub const JENKINS_JOB_FILE: &str = "jenkins_job.json";

const ADHOC_MARKER: &str = "init-manual-parameters_adhoc";
const SKIPPABLE_MARKER: &str = "skippable_adhoc";

/// Name of the adhoc job for a module
pub fn adhoc_job_name(module: &str) -> String {
    format!("forge-module_{}_{}", module, ADHOC_MARKER)
}

/// `1h 2m 3s 4ms`
pub fn format_duration(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{}h {}m {}s {}ms", hours, minutes, seconds, millis)
}

/// A triggered adhoc job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JenkinsJob {
    pub module: String,
    pub job_name: String,
    pub branch: String,
    pub server_url: String,
    /// Build number the trigger is expected to get
    pub build_id: u64,
    /// Queue item URL returned by Jenkins, if any
    pub queue_url: Option<String>,
    pub triggered_at: DateTime<Utc>,
}

impl JenkinsJob {
    /// Record the job in `dir`
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(JENKINS_JOB_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::platform("jenkins", e))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Load the job recorded in `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(JENKINS_JOB_FILE);
        let contents = std::fs::read_to_string(&path)?;
        serde_json::from_str(&contents).map_err(|e| SyncError::platform("jenkins", e))
    }
}

/// Outcome of one build in the job tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Jenkins result (`SUCCESS`, `FAILURE`, `ABORTED`...) or `in progress`
    pub status: String,
    pub url: String,
    pub execution_time: String,
}

/// Overall state of a job tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Success,
    Failed,
    Aborted,
    InProgress,
}

impl JobState {
    /// Fold per-build statuses. Failure outranks abort, abort outranks running.
    pub fn from_builds(builds: &[BuildResult]) -> Self {
        let has = |s: &str| builds.iter().any(|b| b.status == s);
        if has("FAILURE") {
            JobState::Failed
        } else if has("ABORTED") {
            JobState::Aborted
        } else if has(IN_PROGRESS) {
            JobState::InProgress
        } else {
            JobState::Success
        }
    }
}

const IN_PROGRESS: &str = "in progress";

/// Results for one module's job tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsReport {
    pub module: String,
    pub state: JobState,
    pub builds: Vec<BuildResult>,
    pub results_file: PathBuf,
}

/// Authenticated Jenkins REST client
pub struct JenkinsClient {
    http: reqwest::Client,
    server_url: String,
    username: String,
    password: String,
}

impl JenkinsClient {
    pub fn new(server_url: &str, username: String, password: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("modsync")
            .build()
            .map_err(|e| SyncError::platform("jenkins", e))?;
        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    /// Trigger the adhoc job for `module` on `branch`.
    pub async fn create_adhoc_job(
        &self,
        module: &str,
        branch: &str,
        github_user: &str,
    ) -> Result<JenkinsJob> {
        let job_name = adhoc_job_name(module);
        let job_url = format!("{}/job/{}", self.server_url, job_name);

        let job = self.get_json(&format!("{}/api/json", job_url)).await?;
        let build_id = job["nextBuildNumber"].as_u64().unwrap_or(1);

        tracing::info!(module = %module, job = %job_name, build = build_id, "Triggering Jenkins job");
        let response = self
            .http
            .post(format!("{}/buildWithParameters", job_url))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[
                ("GITHUB_USER", github_user),
                ("GITHUB_REPO", module),
                ("GITHUB_REF", branch),
            ])
            .send()
            .await?;
        let response = ensure_success("jenkins", response).await?;
        let queue_url = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(JenkinsJob {
            module: module.to_string(),
            job_name,
            branch: branch.to_string(),
            server_url: self.server_url.clone(),
            build_id,
            queue_url,
            triggered_at: Utc::now(),
        })
    }

    /// Collect results for every build under `job` and write them to
    /// `results_<module>.out` in `dir`.
    pub async fn test_results(&self, job: &JenkinsJob, dir: &Path) -> Result<JenkinsReport> {
        tracing::info!(module = %job.module, "Fetch results from jenkins");
        let root = format!("{}/job/{}", self.server_url, job.job_name);

        let mut text = format!(
            "MODULE_NAME={}\nBUILD_ID={}\nINITIAL_job={}/{}\n\n",
            job.module, job.build_id, root, job.build_id
        );
        let mut builds = Vec::new();

        for url in self.job_tree(&root).await? {
            let data = self.get_json(&api_url(&url)).await?;
            if url.contains(SKIPPABLE_MARKER) || data["color"] == "notbuilt" {
                continue;
            }
            let title = data["fullDisplayName"].as_str().unwrap_or_default();
            if title.to_lowercase().contains("skipped") {
                continue;
            }

            // Matrix jobs report one build per active configuration
            let targets: Vec<String> = match data["activeConfigurations"].as_array() {
                Some(configs) => configs
                    .iter()
                    .filter(|c| c["color"] != "notbuilt")
                    .filter_map(|c| c["url"].as_str().map(str::to_string))
                    .collect(),
                None => vec![url.clone()],
            };
            for target in targets {
                let (result, entry) = self.analyse_build(&target, job.build_id).await?;
                text.push_str(&entry);
                builds.push(result);
            }
        }

        let state = JobState::from_builds(&builds);
        match state {
            JobState::Failed => {
                text.push_str("\nFAILURE. Fix the failures and rerun tests!\n");
                tracing::error!(module = %job.module, "Failed status! Fix errors and rerun.");
            }
            JobState::Aborted => {
                tracing::error!(module = %job.module, "Aborted status! Fix errors and rerun.");
            }
            JobState::InProgress => {
                text.push_str(
                    "\nIN PROGRESS. Please check test report after the execution is done!\n",
                );
                tracing::info!(
                    module = %job.module,
                    "Tests are still running! Fetch the results later with test_results_jenkins"
                );
            }
            JobState::Success => {
                tracing::info!(module = %job.module, "SUCCESSFUL test results!");
            }
        }

        let results_file = dir.join(format!("results_{}.out", job.module));
        std::fs::write(&results_file, text)?;

        Ok(JenkinsReport {
            module: job.module.clone(),
            state,
            builds,
            results_file,
        })
    }

    // --- Private helpers ---

    /// Breadth-first walk over `downstreamProjects`, starting at `root`.
    async fn job_tree(&self, root: &str) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root.trim_end_matches('/').to_string()]);

        while let Some(url) = queue.pop_front() {
            if !seen.insert(url.clone()) {
                continue;
            }
            let data = self.get_json(&api_url(&url)).await?;
            order.push(url);
            if let Some(downstream) = data["downstreamProjects"].as_array() {
                for project in downstream {
                    if let Some(next) = project["url"].as_str() {
                        queue.push_back(next.trim_end_matches('/').to_string());
                    }
                }
            }
        }
        Ok(order)
    }

    /// Status of one build plus its entry for the results file.
    async fn analyse_build(&self, url: &str, build_id: u64) -> Result<(BuildResult, String)> {
        let url = url.trim_end_matches('/');
        // Only the initial job shares the triggered build number
        let logs_link = if url.contains(ADHOC_MARKER) {
            format!("{}/{}/", url, build_id)
        } else {
            format!("{}/lastBuild/", url)
        };
        let data = self.get_json(&format!("{}api/json", logs_link)).await?;

        let (status, execution_time) = match data["result"].as_str() {
            Some(result) => (
                result.to_string(),
                format_duration(data["duration"].as_u64().unwrap_or(0)),
            ),
            None => (IN_PROGRESS.to_string(), "running".to_string()),
        };

        let entry = format!(
            "Job title ={}\n logs_link = {}\n status = {}\n",
            data["fullDisplayName"].as_str().unwrap_or_default(),
            logs_link,
            status
        );
        Ok((
            BuildResult {
                status,
                url: url.to_string(),
                execution_time,
            },
            entry,
        ))
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let response = ensure_success("jenkins", response).await?;
        Ok(response.json().await?)
    }
}

fn api_url(url: &str) -> String {
    format!("{}/api/json", url.trim_end_matches('/'))
}
