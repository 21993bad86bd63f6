//! Document wiki adapter (Confluence-compatible REST).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use planforge_config::{TrackerConfig, WikiConfig};
use planforge_utils::{ConfigError, FetchError, redact};

/// A fully fetched wiki document.
#[derive(Debug, Clone)]
pub struct WikiDocument {
    pub id: String,
    pub title: String,
    pub content: String,
}

/// A search hit: enough to offer the document to the selection call
/// without fetching its body.
#[derive(Debug, Clone)]
pub struct WikiCandidate {
    pub id: String,
    pub title: String,
    pub excerpt: String,
}

/// Wiki operations the retrieval filter consumes.
#[async_trait]
pub trait WikiClient: Send + Sync {
    /// Fetch a document by exact title within a space. `Ok(None)` means
    /// the title does not exist, which is a normal outcome for tier 1.
    async fn get_document(
        &self,
        space: &str,
        title: &str,
    ) -> Result<Option<WikiDocument>, FetchError>;

    /// Search a space for candidate documents.
    async fn search_documents(
        &self,
        space: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<WikiCandidate>, FetchError>;
}

/// Confluence-compatible REST implementation. Shares the tracker account's
/// basic-auth credentials.
pub struct HttpWiki {
    client: reqwest::Client,
    base_url: String,
    email: String,
    token: String,
    timeout_secs: u64,
}

impl HttpWiki {
    pub fn new_from_config(
        config: &WikiConfig,
        tracker: &TrackerConfig,
    ) -> Result<Self, ConfigError> {
        let (email, token) = tracker.resolve_credentials()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "wiki".to_string(),
                value: redact(&e.to_string()),
            })?;
        Ok(Self {
            client,
            base_url: config.effective_base_url(tracker).trim_end_matches('/').to_string(),
            email,
            token,
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn fetch_error(&self, operation: &str, space: &str, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                service: "wiki".into(),
                seconds: self.timeout_secs,
            }
        } else {
            FetchError::Wiki {
                operation: operation.into(),
                space: space.into(),
                detail: redact(&error.to_string()),
            }
        }
    }
}

#[derive(Deserialize)]
struct ContentList {
    #[serde(default)]
    results: Vec<ContentEntry>,
}

#[derive(Deserialize)]
struct ContentEntry {
    id: String,
    title: String,
    #[serde(default)]
    body: Option<ContentBody>,
    #[serde(default)]
    excerpt: Option<String>,
}

#[derive(Deserialize)]
struct ContentBody {
    #[serde(default)]
    storage: Option<ContentStorage>,
}

#[derive(Deserialize)]
struct ContentStorage {
    #[serde(default)]
    value: String,
}

#[async_trait]
impl WikiClient for HttpWiki {
    async fn get_document(
        &self,
        space: &str,
        title: &str,
    ) -> Result<Option<WikiDocument>, FetchError> {
        debug!(space, title, "fetching wiki document by title");
        let response = self
            .client
            .get(format!("{}/rest/api/content", self.base_url))
            .basic_auth(&self.email, Some(&self.token))
            .query(&[
                ("spaceKey", space),
                ("title", title),
                ("expand", "body.storage"),
            ])
            .send()
            .await
            .map_err(|e| self.fetch_error("get_document", space, e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(FetchError::Unauthorized {
                service: "wiki".into(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Wiki {
                operation: "get_document".into(),
                space: space.into(),
                detail: format!("{status}: {}", redact(&body.chars().take(200).collect::<String>())),
            });
        }

        let list: ContentList = response
            .json()
            .await
            .map_err(|e| self.fetch_error("get_document", space, e))?;

        Ok(list.results.into_iter().next().map(|entry| WikiDocument {
            content: entry
                .body
                .and_then(|b| b.storage)
                .map(|s| s.value)
                .unwrap_or_default(),
            id: entry.id,
            title: entry.title,
        }))
    }

    async fn search_documents(
        &self,
        space: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<WikiCandidate>, FetchError> {
        debug!(space, query, limit, "searching wiki documents");
        let cql = format!("space = \"{space}\" and type = page and text ~ \"{query}\"");
        let response = self
            .client
            .get(format!("{}/rest/api/content/search", self.base_url))
            .basic_auth(&self.email, Some(&self.token))
            .query(&[("cql", cql.as_str()), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| self.fetch_error("search_documents", space, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Wiki {
                operation: "search_documents".into(),
                space: space.into(),
                detail: format!("{status}: {}", redact(&body.chars().take(200).collect::<String>())),
            });
        }

        let list: ContentList = response
            .json()
            .await
            .map_err(|e| self.fetch_error("search_documents", space, e))?;

        Ok(list
            .results
            .into_iter()
            .take(limit)
            .map(|entry| WikiCandidate {
                id: entry.id,
                title: entry.title,
                excerpt: entry.excerpt.unwrap_or_default(),
            })
            .collect())
    }
}
