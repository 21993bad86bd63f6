//! Issue tracker adapter (Jira-compatible REST v2).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use planforge_config::TrackerConfig;
use planforge_utils::{ConfigError, FetchError, redact};

use crate::context::{CommentRecord, TrackerContext};
use crate::work_item::WorkItemKey;

/// Tracker operations the pipeline consumes. Only feedback incorporation
/// may call `transition_status`.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn get_issue(&self, key: &WorkItemKey) -> Result<TrackerContext, FetchError>;
    async fn search_comments(&self, key: &WorkItemKey) -> Result<Vec<CommentRecord>, FetchError>;
    async fn add_comment(&self, key: &WorkItemKey, body: &str) -> Result<(), FetchError>;
    async fn transition_status(&self, key: &WorkItemKey, target: &str) -> Result<(), FetchError>;
}

/// Jira-compatible REST implementation with basic auth.
pub struct HttpTracker {
    client: reqwest::Client,
    base_url: String,
    email: String,
    token: String,
    timeout_secs: u64,
}

impl HttpTracker {
    pub fn new_from_config(config: &TrackerConfig) -> Result<Self, ConfigError> {
        let (email, token) = config.resolve_credentials()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "tracker".to_string(),
                value: redact(&e.to_string()),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email,
            token,
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/rest/api/2/{path}", self.base_url)
    }

    fn fetch_error(&self, operation: &str, key: &WorkItemKey, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                service: "tracker".into(),
                seconds: self.timeout_secs,
            }
        } else {
            FetchError::Tracker {
                operation: operation.into(),
                key: key.to_string(),
                detail: redact(&error.to_string()),
            }
        }
    }

    fn status_error(
        operation: &str,
        key: &WorkItemKey,
        status: reqwest::StatusCode,
        body: &str,
    ) -> FetchError {
        match status.as_u16() {
            401 | 403 => FetchError::Unauthorized {
                service: "tracker".into(),
            },
            _ => FetchError::Tracker {
                operation: operation.into(),
                key: key.to_string(),
                detail: format!("{status}: {}", redact(&body.chars().take(200).collect::<String>())),
            },
        }
    }
}

#[derive(Deserialize)]
struct IssueResponse {
    fields: IssueFields,
}

#[derive(Deserialize)]
struct IssueFields {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    status: StatusField,
    #[serde(default)]
    assignee: Option<UserField>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    parent: Option<ParentField>,
    #[serde(default)]
    components: Vec<NamedField>,
    /// Custom field carrying the explicit knowledge-space link, when the
    /// project configures one.
    #[serde(default, rename = "customfield_10100")]
    project_link: Option<String>,
}

#[derive(Deserialize)]
struct StatusField {
    name: String,
}

#[derive(Deserialize)]
struct UserField {
    #[serde(default, rename = "displayName")]
    display_name: Option<String>,
    #[serde(default, rename = "accountId")]
    account_id: Option<String>,
}

#[derive(Deserialize)]
struct ParentField {
    key: String,
}

#[derive(Deserialize)]
struct NamedField {
    name: String,
}

#[derive(Deserialize)]
struct CommentsResponse {
    #[serde(default)]
    comments: Vec<CommentResponse>,
}

#[derive(Deserialize)]
struct CommentResponse {
    #[serde(default)]
    author: Option<UserField>,
    #[serde(default)]
    body: Option<String>,
    created: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TransitionsResponse {
    transitions: Vec<TransitionEntry>,
}

#[derive(Deserialize)]
struct TransitionEntry {
    id: String,
    name: String,
}

#[async_trait]
impl TrackerClient for HttpTracker {
    async fn get_issue(&self, key: &WorkItemKey) -> Result<TrackerContext, FetchError> {
        debug!(%key, "fetching tracker issue");
        let response = self
            .client
            .get(self.api(&format!("issue/{key}")))
            .basic_auth(&self.email, Some(&self.token))
            .send()
            .await
            .map_err(|e| self.fetch_error("get_issue", key, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error("get_issue", key, status, &body));
        }

        let issue: IssueResponse = response
            .json()
            .await
            .map_err(|e| self.fetch_error("get_issue", key, e))?;

        let comments = self.search_comments(key).await?;
        let fields = issue.fields;
        let (assignee, assignee_account_id) = match fields.assignee {
            Some(user) => (user.display_name, user.account_id),
            None => (None, None),
        };

        Ok(TrackerContext {
            key: key.clone(),
            summary: fields.summary.unwrap_or_default(),
            description: fields.description.unwrap_or_default(),
            status: fields.status.name,
            assignee,
            assignee_account_id,
            labels: fields.labels,
            parent: fields.parent.map(|p| p.key),
            components: fields.components.into_iter().map(|c| c.name).collect(),
            project_link: fields.project_link,
            comments,
            fetched_at: Utc::now(),
        })
    }

    async fn search_comments(&self, key: &WorkItemKey) -> Result<Vec<CommentRecord>, FetchError> {
        let response = self
            .client
            .get(self.api(&format!("issue/{key}/comment")))
            .basic_auth(&self.email, Some(&self.token))
            .send()
            .await
            .map_err(|e| self.fetch_error("search_comments", key, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error("search_comments", key, status, &body));
        }

        let parsed: CommentsResponse = response
            .json()
            .await
            .map_err(|e| self.fetch_error("search_comments", key, e))?;

        Ok(parsed
            .comments
            .into_iter()
            .map(|c| {
                let (author, author_account_id) = match c.author {
                    Some(user) => (
                        user.display_name.unwrap_or_else(|| "unknown".into()),
                        user.account_id,
                    ),
                    None => ("unknown".into(), None),
                };
                CommentRecord {
                    author,
                    author_account_id,
                    body: c.body.unwrap_or_default(),
                    created_at: c.created,
                }
            })
            .collect())
    }

    async fn add_comment(&self, key: &WorkItemKey, body: &str) -> Result<(), FetchError> {
        debug!(%key, bytes = body.len(), "posting tracker comment");
        let response = self
            .client
            .post(self.api(&format!("issue/{key}/comment")))
            .basic_auth(&self.email, Some(&self.token))
            .json(&json!({ "body": body }))
            .send()
            .await
            .map_err(|e| self.fetch_error("add_comment", key, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error("add_comment", key, status, &body));
        }
        Ok(())
    }

    async fn transition_status(&self, key: &WorkItemKey, target: &str) -> Result<(), FetchError> {
        // Transition ids are workflow-specific; look up the one whose name
        // matches the target status.
        let response = self
            .client
            .get(self.api(&format!("issue/{key}/transitions")))
            .basic_auth(&self.email, Some(&self.token))
            .send()
            .await
            .map_err(|e| self.fetch_error("transition_status", key, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error("transition_status", key, status, &body));
        }

        let transitions: TransitionsResponse = response
            .json()
            .await
            .map_err(|e| self.fetch_error("transition_status", key, e))?;

        let transition = transitions
            .transitions
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(target))
            .ok_or_else(|| FetchError::Tracker {
                operation: "transition_status".into(),
                key: key.to_string(),
                detail: format!("no transition to '{target}' available from current status"),
            })?;

        debug!(%key, target, transition_id = %transition.id, "transitioning issue");
        let response = self
            .client
            .post(self.api(&format!("issue/{key}/transitions")))
            .basic_auth(&self.email, Some(&self.token))
            .json(&json!({ "transition": { "id": transition.id } }))
            .send()
            .await
            .map_err(|e| self.fetch_error("transition_status", key, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error("transition_status", key, status, &body));
        }
        Ok(())
    }
}
