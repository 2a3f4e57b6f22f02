//! Shared fixtures: bare git "remotes" and an in-memory hosting platform.

#![allow(dead_code)]

use async_trait::async_trait;
use git2::build::RepoBuilder;
use git2::{Repository, Signature};
use modsync_core::platform::{PullRequest, SourcePlatform};
use modsync_core::state::Workspace;
use modsync_core::{Config, Credentials, Orchestrator, Result, SyncError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const NAMESPACE: &str = "ns";

/// Create a bare remote at `<base>/ns/<module>.git` holding `files` on master.
pub fn seed_remote(base: &Path, module: &str, files: &[(&str, &str)]) {
    let work = base.join("seeds").join(module);
    let repo = Repository::init(&work).unwrap();
    let mut index = repo.index().unwrap();
    for (name, contents) in files {
        std::fs::write(work.join(name), contents).unwrap();
        index.add_path(Path::new(name)).unwrap();
    }
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("seed", "seed@example.com").unwrap();
    repo.commit(Some("refs/heads/master"), &sig, &sig, "init", &tree, &[])
        .unwrap();
    repo.set_head("refs/heads/master").unwrap();

    RepoBuilder::new()
        .bare(true)
        .clone(
            work.to_str().unwrap(),
            &base.join(NAMESPACE).join(format!("{}.git", module)),
        )
        .unwrap();
}

/// Configuration pointing at the local remotes under `base`.
pub fn test_config(base: &Path) -> Config {
    Config {
        namespace: NAMESPACE.to_string(),
        staging_dir: base.join("staging"),
        gem_staging_dir: base.join("gems"),
        git_base_uri: Some(base.to_str().unwrap().to_string()),
        default_label: String::new(),
        tool_path: Some(PathBuf::from("/bin/false")),
        ..Config::default()
    }
}

/// Orchestrator with home left at the current directory so nothing moves the process.
pub fn orchestrator(config: Config, platform: RecordingPlatform) -> Orchestrator {
    orchestrator_with_credentials(config, platform, Credentials::default())
}

pub fn orchestrator_with_credentials(
    config: Config,
    platform: RecordingPlatform,
    credentials: Credentials,
) -> Orchestrator {
    let home = std::env::current_dir().unwrap();
    let workspace = Workspace::with_home(&config.staging_dir, home);
    Orchestrator::with_workspace(config, credentials, workspace).with_platform(Box::new(platform))
}

/// Executable shell script at `<base>/bin/<name>` standing in for an external tool.
pub fn write_tool(base: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let dir = base.join("bin");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPr {
    pub repo: String,
    pub target: String,
    pub source: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub created: Vec<CreatedPr>,
    pub labels_listed: usize,
    pub labels_set: Vec<(String, u64, Vec<String>)>,
    pub deleted: Vec<(String, String)>,
}

/// Records every call; clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingPlatform {
    pub labels: Vec<String>,
    pub fail_pull_requests: bool,
    pub record: Arc<Mutex<Recorded>>,
}

impl RecordingPlatform {
    pub fn with_labels(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn created(&self) -> Vec<CreatedPr> {
        self.record.lock().unwrap().created.clone()
    }

    pub fn labels_listed(&self) -> usize {
        self.record.lock().unwrap().labels_listed
    }

    pub fn labels_set(&self) -> Vec<(String, u64, Vec<String>)> {
        self.record.lock().unwrap().labels_set.clone()
    }
}

#[async_trait]
impl SourcePlatform for RecordingPlatform {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn repository_exists(&self, full_name: &str) -> Result<bool> {
        Ok(!full_name.ends_with("missing"))
    }

    async fn create_pull_request(
        &self,
        full_name: &str,
        target_branch: &str,
        source_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        if self.fail_pull_requests {
            return Err(SyncError::platform("recording", "422 Unprocessable Entity"));
        }
        let mut record = self.record.lock().unwrap();
        record.created.push(CreatedPr {
            repo: full_name.to_string(),
            target: target_branch.to_string(),
            source: source_branch.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        let id = record.created.len() as u64;
        Ok(PullRequest {
            url: format!("https://example.com/{}/pull/{}", full_name, id),
            id,
        })
    }

    async fn list_labels(&self, _full_name: &str) -> Result<Vec<String>> {
        self.record.lock().unwrap().labels_listed += 1;
        Ok(self.labels.clone())
    }

    async fn set_labels(&self, full_name: &str, pr_id: u64, labels: &[String]) -> Result<()> {
        self.record
            .lock()
            .unwrap()
            .labels_set
            .push((full_name.to_string(), pr_id, labels.to_vec()));
        Ok(())
    }

    async fn delete_branch(&self, full_name: &str, branch_name: &str) -> Result<()> {
        self.record
            .lock()
            .unwrap()
            .deleted
            .push((full_name.to_string(), branch_name.to_string()));
        Ok(())
    }
}
