//! # Source Platforms
//!
//! One interface over the hosting platforms. Each backend maps its own
//! pull/merge request objects onto [`PullRequest`]; nothing else crosses
//! this boundary.
//!
//! - `github` - GitHub REST v3
//! - `gitlab` - GitLab REST v4
//! - `jenkins` - CI jobs for the Jenkins steps
//! - `gemfury` - private gem server uploads

pub mod gemfury;
pub mod github;
pub mod gitlab;
pub mod jenkins;

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A created pull/merge request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Browser URL
    pub url: String,
    /// Number (GitHub) or iid (GitLab)
    pub id: u64,
}

/// Operations the pipeline needs from a hosting platform
#[async_trait]
pub trait SourcePlatform: Send + Sync {
    /// Short platform name for logs
    fn name(&self) -> &'static str;

    /// Whether `namespace/project` exists
    async fn repository_exists(&self, full_name: &str) -> Result<bool>;

    /// Open a pull/merge request from `source_branch` into `target_branch`
    async fn create_pull_request(
        &self,
        full_name: &str,
        target_branch: &str,
        source_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest>;

    /// Names of every label defined on the repository
    async fn list_labels(&self, full_name: &str) -> Result<Vec<String>>;

    /// Replace the labels on pull/merge request `pr_id`
    async fn set_labels(&self, full_name: &str, pr_id: u64, labels: &[String]) -> Result<()>;

    /// Delete a branch on the remote
    async fn delete_branch(&self, full_name: &str, branch_name: &str) -> Result<()>;
}

/// True only when `label` is an exact, case-sensitive match for one of the
/// repository's labels. Lookup failures are logged and count as a miss.
pub async fn check_label_exists(client: &dyn SourcePlatform, repo: &str, label: &str) -> bool {
    match client.list_labels(repo).await {
        Ok(labels) if labels.iter().any(|l| l == label) => true,
        Ok(_) => {
            tracing::error!(repo = %repo, "Label '{}' not found in {}", label, repo);
            false
        }
        Err(e) => {
            tracing::error!(repo = %repo, "Retrieving labels for {} has failed. {}", repo, e);
            false
        }
    }
}

/// Add `label` to a pull request. Failures are logged, never raised.
pub async fn add_label(client: &dyn SourcePlatform, repo: &str, pr_id: u64, label: &str) -> bool {
    match client.set_labels(repo, pr_id, &[label.to_string()]).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                repo = %repo,
                "Adding label to {} issue {} has failed. {}",
                repo,
                pr_id,
                e
            );
            false
        }
    }
}

/// Delete a remote branch. Failures are logged, never raised.
pub async fn delete_branch(client: &dyn SourcePlatform, repo: &str, branch: &str) -> bool {
    match client.delete_branch(repo, branch).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(repo = %repo, "Deleting {} in {} failed. {}", branch, repo, e);
            false
        }
    }
}

/// Label to apply: a step-specific label wins over the run default, and an
/// empty string from either source disables labelling.
pub fn effective_label(specific: Option<&str>, default: &str) -> Option<String> {
    let label = specific.unwrap_or(default);
    if label.is_empty() {
        None
    } else {
        Some(label.to_string())
    }
}

/// Check that every module exists on the platform, listing all missing ones.
pub async fn validate_modules_exist(
    client: &dyn SourcePlatform,
    namespace: &str,
    modules: &[String],
) -> Result<()> {
    let mut missing = Vec::new();
    for module in modules {
        let full_name = format!("{}/{}", namespace, module);
        if !client.repository_exists(&full_name).await? {
            missing.push(module.clone());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SyncError::MissingRepositories(missing))
    }
}

/// Map a non-success HTTP response to a platform error.
pub(crate) async fn ensure_success(
    platform: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::platform(
        platform,
        format!("{} {}", status, body.trim()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        labels: Result<Vec<String>>,
    }

    #[async_trait]
    impl SourcePlatform for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        async fn repository_exists(&self, full_name: &str) -> Result<bool> {
            Ok(!full_name.ends_with("missing"))
        }
        async fn create_pull_request(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<PullRequest> {
            Err(SyncError::platform("fixed", "unused"))
        }
        async fn list_labels(&self, _: &str) -> Result<Vec<String>> {
            match &self.labels {
                Ok(l) => Ok(l.clone()),
                Err(_) => Err(SyncError::platform("fixed", "offline")),
            }
        }
        async fn set_labels(&self, _: &str, _: u64, _: &[String]) -> Result<()> {
            Err(SyncError::platform("fixed", "forbidden"))
        }
        async fn delete_branch(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_label_exact_match() {
        let client = Fixed {
            labels: Ok(vec!["maintenance".into(), "bug".into()]),
        };
        assert!(check_label_exists(&client, "a/b", "maintenance").await);
        assert!(!check_label_exists(&client, "a/b", "Maintenance").await);
        assert!(!check_label_exists(&client, "a/b", "doot doot").await);
    }

    #[tokio::test]
    async fn test_label_lookup_failure_is_miss() {
        let client = Fixed {
            labels: Err(SyncError::platform("fixed", "offline")),
        };
        assert!(!check_label_exists(&client, "a/b", "maintenance").await);
    }

    #[tokio::test]
    async fn test_add_label_swallows_errors() {
        let client = Fixed { labels: Ok(vec![]) };
        assert!(!add_label(&client, "a/b", 3, "bug").await);
    }

    #[test]
    fn test_effective_label() {
        assert_eq!(
            effective_label(Some("bug"), "maintenance").as_deref(),
            Some("bug")
        );
        assert_eq!(
            effective_label(None, "maintenance").as_deref(),
            Some("maintenance")
        );
        assert_eq!(effective_label(Some(""), "maintenance"), None);
        assert_eq!(effective_label(None, ""), None);
    }

    #[tokio::test]
    async fn test_validate_modules_exist() {
        let client = Fixed { labels: Ok(vec![]) };
        let ok = vec!["puppetlabs-testing".to_string()];
        assert!(validate_modules_exist(&client, "puppetlabs", &ok).await.is_ok());

        let bad = vec!["one".to_string(), "two-missing".to_string()];
        match validate_modules_exist(&client, "puppetlabs", &bad).await {
            Err(SyncError::MissingRepositories(m)) => assert_eq!(m, vec!["two-missing"]),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
