//! # GitHub Backend
//!
//! Thin REST v3 client. Pull requests come back as `{html_url, number}`.

use super::{ensure_success, PullRequest, SourcePlatform};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_API: &str = "https://api.github.com";

/// GitHub REST client
pub struct GithubClient {
    http: reqwest::Client,
    api: String,
}

#[derive(Debug, Deserialize)]
struct GithubPull {
    html_url: String,
    number: u64,
}

#[derive(Debug, Deserialize)]
struct GithubLabel {
    name: String,
}

impl From<GithubPull> for PullRequest {
    fn from(pr: GithubPull) -> Self {
        PullRequest {
            url: pr.html_url,
            id: pr.number,
        }
    }
}

impl GithubClient {
    /// Create a client authenticated with `token`; `api_endpoint` overrides api.github.com
    pub fn new(token: String, api_endpoint: Option<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| SyncError::platform("github", e))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("modsync"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::platform("github", e))?;

        Ok(Self {
            http,
            api: api_endpoint
                .unwrap_or_else(|| DEFAULT_API.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api, path)
    }
}

#[async_trait]
impl SourcePlatform for GithubClient {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn repository_exists(&self, full_name: &str) -> Result<bool> {
        let response = self
            .http
            .get(self.url(&format!("/repos/{}", full_name)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success("github", response).await?;
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
            .post(self.url(&format!("/repos/{}/pulls", full_name)))
            .json(&json!({
                "base": target_branch,
                "head": source_branch,
                "title": title,
                "body": body,
            }))
            .send()
            .await?;
        let pull: GithubPull = ensure_success("github", response).await?.json().await?;
        Ok(pull.into())
    }

    async fn list_labels(&self, full_name: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page = 1;
        loop {
            let response = self
                .http
                .get(self.url(&format!("/repos/{}/labels", full_name)))
                .query(&[("per_page", "100"), ("page", &page.to_string())])
                .send()
                .await?;
            let labels: Vec<GithubLabel> =
                ensure_success("github", response).await?.json().await?;
            let done = labels.len() < 100;
            names.extend(labels.into_iter().map(|l| l.name));
            if done {
                break;
            }
            page += 1;
        }
        Ok(names)
    }

    async fn set_labels(&self, full_name: &str, pr_id: u64, labels: &[String]) -> Result<()> {
        let response = self
            .http
            .patch(self.url(&format!("/repos/{}/issues/{}", full_name, pr_id)))
            .json(&json!({ "labels": labels }))
            .send()
            .await?;
        ensure_success("github", response).await?;
        Ok(())
    }

    async fn delete_branch(&self, full_name: &str, branch_name: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!(
                "/repos/{}/git/refs/heads/{}",
                full_name, branch_name
            )))
            .send()
            .await?;
        ensure_success("github", response).await?;
        Ok(())
    }
}
