//! # GitLab Backend
//!
//! Thin REST v4 client. Projects are addressed by their URL-encoded full
//! path; merge requests come back as `{web_url, iid}`.

use super::{ensure_success, PullRequest, SourcePlatform};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

/// GitLab REST client
pub struct GitlabClient {
    http: reqwest::Client,
    api: String,
}

#[derive(Debug, Deserialize)]
struct GitlabMergeRequest {
    web_url: String,
    iid: u64,
}

#[derive(Debug, Deserialize)]
struct GitlabLabel {
    name: String,
}

impl From<GitlabMergeRequest> for PullRequest {
    fn from(mr: GitlabMergeRequest) -> Self {
        PullRequest {
            url: mr.web_url,
            id: mr.iid,
        }
    }
}

impl GitlabClient {
    /// Create a client for `api_endpoint` authenticated with a private token
    pub fn new(token: String, api_endpoint: String) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&token).map_err(|e| SyncError::platform("gitlab", e))?;
        headers.insert("PRIVATE-TOKEN", auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::platform("gitlab", e))?;

        Ok(Self {
            http,
            api: api_endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn project_url(&self, full_name: &str, rest: &str) -> String {
        format!(
            "{}/projects/{}{}",
            self.api,
            urlencoding::encode(full_name),
            rest
        )
    }
}

/// GitLab wants labels as one comma-separated string.
fn join_labels(labels: &[String]) -> String {
    labels.join(",")
}

#[async_trait]
impl SourcePlatform for GitlabClient {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    async fn repository_exists(&self, full_name: &str) -> Result<bool> {
        let response = self.http.get(self.project_url(full_name, "")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success("gitlab", response).await?;
        Ok(true)
    }

    async fn create_pull_request(
        &self,
        full_name: &str,
        target_branch: &str,
        source_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let response = self
            .http
            .post(self.project_url(full_name, "/merge_requests"))
            .json(&json!({
                "source_branch": source_branch,
                "target_branch": target_branch,
                "title": title,
                "description": body,
            }))
            .send()
            .await?;
        let mr: GitlabMergeRequest = ensure_success("gitlab", response).await?.json().await?;
        Ok(mr.into())
    }

    async fn list_labels(&self, full_name: &str) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.project_url(full_name, "/labels"))
            .query(&[("per_page", "100")])
            .send()
            .await?;
        let labels: Vec<GitlabLabel> = ensure_success("gitlab", response).await?.json().await?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    async fn set_labels(&self, full_name: &str, pr_id: u64, labels: &[String]) -> Result<()> {
        let response = self
            .http
            .put(self.project_url(full_name, &format!("/merge_requests/{}", pr_id)))
            .json(&json!({ "labels": join_labels(labels) }))
            .send()
            .await?;
        ensure_success("gitlab", response).await?;
        Ok(())
    }

    async fn delete_branch(&self, full_name: &str, branch_name: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.project_url(
                full_name,
                &format!("/repository/branches/{}", urlencoding::encode(branch_name)),
            ))
            .send()
            .await?;
        ensure_success("gitlab", response).await?;
        Ok(())
    }
}
