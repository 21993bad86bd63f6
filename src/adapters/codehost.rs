//! Code host adapter (GitHub-compatible REST).
//!
//! File contents are fetched with the raw media type so no base64 decode
//! is needed. A token is optional; public repositories work anonymously
//! within rate limits.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use planforge_config::CodeHostConfig;
use planforge_utils::{ConfigError, FetchError, redact};

/// Code host operations the context assembler consumes.
#[async_trait]
pub trait CodeHostClient: Send + Sync {
    /// Flat list of file paths at HEAD, bounded by the caller.
    async fn get_tree(&self, owner: &str, repo: &str, limit: usize)
    -> Result<Vec<String>, FetchError>;

    /// Raw file content. `Ok(None)` when the path does not exist.
    async fn get_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Option<String>, FetchError>;

    /// One-line summaries of the n most recent commits.
    async fn list_recent_commits(
        &self,
        owner: &str,
        repo: &str,
        n: usize,
    ) -> Result<Vec<String>, FetchError>;
}

/// GitHub-compatible REST implementation.
pub struct HttpCodeHost {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout_secs: u64,
}

impl HttpCodeHost {
    pub fn new_from_config(config: &CodeHostConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent("planforge")
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "code_host".to_string(),
                value: redact(&e.to_string()),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.resolve_token(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn request(&self, url: String) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn fetch_error(&self, operation: &str, repo: &str, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                service: "code host".into(),
                seconds: self.timeout_secs,
            }
        } else {
            FetchError::CodeHost {
                operation: operation.into(),
                repo: repo.into(),
                detail: redact(&error.to_string()),
            }
        }
    }

    fn status_error(
        operation: &str,
        repo: &str,
        status: reqwest::StatusCode,
        body: &str,
    ) -> FetchError {
        match status.as_u16() {
            401 | 403 => FetchError::Unauthorized {
                service: "code host".into(),
            },
            _ => FetchError::CodeHost {
                operation: operation.into(),
                repo: repo.into(),
                detail: format!("{status}: {}", redact(&body.chars().take(200).collect::<String>())),
            },
        }
    }
}

#[derive(Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct CommitEntry {
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    message: String,
}

#[async_trait]
impl CodeHostClient for HttpCodeHost {
    async fn get_tree(
        &self,
        owner: &str,
        repo: &str,
        limit: usize,
    ) -> Result<Vec<String>, FetchError> {
        let full = format!("{owner}/{repo}");
        debug!(repo = %full, limit, "fetching repository tree");
        let response = self
            .request(format!(
                "{}/repos/{owner}/{repo}/git/trees/HEAD?recursive=1",
                self.base_url
            ))
            .send()
            .await
            .map_err(|e| self.fetch_error("get_tree", &full, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error("get_tree", &full, status, &body));
        }

        let parsed: TreeResponse = response
            .json()
            .await
            .map_err(|e| self.fetch_error("get_tree", &full, e))?;

        Ok(parsed
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| entry.path)
            .take(limit)
            .collect())
    }

    async fn get_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Option<String>, FetchError> {
        let full = format!("{owner}/{repo}");
        let response = self
            .request(format!(
                "{}/repos/{owner}/{repo}/contents/{path}",
                self.base_url
            ))
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .await
            .map_err(|e| self.fetch_error("get_file", &full, e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error("get_file", &full, status, &body));
        }

        response
            .text()
            .await
            .map(Some)
            .map_err(|e| self.fetch_error("get_file", &full, e))
    }

    async fn list_recent_commits(
        &self,
        owner: &str,
        repo: &str,
        n: usize,
    ) -> Result<Vec<String>, FetchError> {
        let full = format!("{owner}/{repo}");
        let response = self
            .request(format!(
                "{}/repos/{owner}/{repo}/commits?per_page={n}",
                self.base_url
            ))
            .send()
            .await
            .map_err(|e| self.fetch_error("list_recent_commits", &full, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error("list_recent_commits", &full, status, &body));
        }

        let commits: Vec<CommitEntry> = response
            .json()
            .await
            .map_err(|e| self.fetch_error("list_recent_commits", &full, e))?;

        Ok(commits
            .into_iter()
            .take(n)
            .map(|c| c.commit.message.lines().next().unwrap_or_default().to_string())
            .collect())
    }
}
