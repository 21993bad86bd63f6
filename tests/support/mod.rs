//! Shared fakes for integration tests: in-memory service clients and a
//! scripted reasoning backend.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use planforge::adapters::{
    CodeHostClient, TrackerClient, WikiCandidate, WikiClient, WikiDocument,
};
use planforge::{CommentRecord, TrackerContext, WorkItemKey};
use planforge_llm::{ReasoningBackend, ReasoningRequest, ReasoningResult};
use planforge_utils::{FetchError, ReasoningError};

pub fn sample_issue(key: &str, status: &str) -> TrackerContext {
    TrackerContext {
        key: WorkItemKey::parse(key).unwrap(),
        summary: "Add RateLimiter middleware to the public API".into(),
        description: "Protect the public API from abuse.".into(),
        status: status.into(),
        assignee: Some("Dana".into()),
        assignee_account_id: Some("acct-dana".into()),
        labels: vec![],
        parent: None,
        components: vec![],
        project_link: None,
        comments: vec![],
        fetched_at: Utc::now(),
    }
}

/// A syntactically valid five-section planning response.
pub fn valid_response() -> String {
    "\
## 1. Understanding

The public API needs request rate limiting to protect shared capacity.

## 2. Concerns

- [DATA MISSING: expected request volume]

## 3. Analysis

A token bucket per client key is the smallest change that satisfies the need.

Complexity: (M)

## 4. Work Plan

- [ ] **Step 1:** Add a token bucket limiter middleware
  - **Layer:** [BE]
  - **Files:** src/middleware/limiter.rs, src/app.rs
  - **Acceptance:** Requests over the limit receive 429

- [ ] **Step 2:** Document the limits for API consumers
  - **Layer:** [DOCS]
  - **Files:** docs/api.md
  - **Acceptance:** Published limits match the configured values
  - **Depends on:** Step 1

## 5. Definition of Ready

- [x] Affected services identified
- [x] Acceptance criteria per step
"
    .to_string()
}

pub struct FakeTracker {
    pub issue: Mutex<TrackerContext>,
    pub comments_posted: Mutex<Vec<String>>,
    pub transitions: Mutex<Vec<String>>,
}

impl FakeTracker {
    pub fn new(issue: TrackerContext) -> Self {
        Self {
            issue: Mutex::new(issue),
            comments_posted: Mutex::new(Vec::new()),
            transitions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TrackerClient for FakeTracker {
    async fn get_issue(&self, _key: &WorkItemKey) -> Result<TrackerContext, FetchError> {
        Ok(self.issue.lock().unwrap().clone())
    }

    async fn search_comments(&self, _key: &WorkItemKey) -> Result<Vec<CommentRecord>, FetchError> {
        Ok(self.issue.lock().unwrap().comments.clone())
    }

    async fn add_comment(&self, _key: &WorkItemKey, body: &str) -> Result<(), FetchError> {
        self.comments_posted.lock().unwrap().push(body.to_string());
        Ok(())
    }

    async fn transition_status(&self, _key: &WorkItemKey, target: &str) -> Result<(), FetchError> {
        self.transitions.lock().unwrap().push(target.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeWiki {
    /// Keyed by (space, title).
    pub documents: HashMap<(String, String), WikiDocument>,
    pub candidates: Vec<WikiCandidate>,
    pub get_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
}

impl FakeWiki {
    pub fn with_document(mut self, space: &str, doc: WikiDocument) -> Self {
        self.documents
            .insert((space.to_string(), doc.title.clone()), doc);
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<WikiCandidate>) -> Self {
        self.candidates = candidates;
        self
    }
}

pub fn wiki_doc(id: &str, title: &str, content: &str) -> WikiDocument {
    WikiDocument {
        id: id.into(),
        title: title.into(),
        content: content.into(),
    }
}

pub fn candidate(id: &str, title: &str) -> WikiCandidate {
    WikiCandidate {
        id: id.into(),
        title: title.into(),
        excerpt: String::new(),
    }
}

#[async_trait]
impl WikiClient for FakeWiki {
    async fn get_document(
        &self,
        space: &str,
        title: &str,
    ) -> Result<Option<WikiDocument>, FetchError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .documents
            .get(&(space.to_string(), title.to_string()))
            .cloned())
    }

    async fn search_documents(
        &self,
        _space: &str,
        _query: &str,
        limit: usize,
    ) -> Result<Vec<WikiCandidate>, FetchError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.candidates.iter().take(limit).cloned().collect())
    }
}

#[derive(Default)]
pub struct FakeCodeHost {
    pub tree: Vec<String>,
    pub files: HashMap<String, String>,
    pub commits: Vec<String>,
}

#[async_trait]
impl CodeHostClient for FakeCodeHost {
    async fn get_tree(
        &self,
        _owner: &str,
        _repo: &str,
        limit: usize,
    ) -> Result<Vec<String>, FetchError> {
        Ok(self.tree.iter().take(limit).cloned().collect())
    }

    async fn get_file(
        &self,
        _owner: &str,
        _repo: &str,
        path: &str,
    ) -> Result<Option<String>, FetchError> {
        Ok(self.files.get(path).cloned())
    }

    async fn list_recent_commits(
        &self,
        _owner: &str,
        _repo: &str,
        n: usize,
    ) -> Result<Vec<String>, FetchError> {
        Ok(self.commits.iter().take(n).cloned().collect())
    }
}

/// Backend that replays queued responses and counts invocations.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<ReasoningResult, ReasoningError>>>,
    pub invocations: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<Result<ReasoningResult, ReasoningError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn replying(texts: Vec<&str>) -> Self {
        Self::new(
            texts
                .into_iter()
                .map(|t| Ok(ReasoningResult::new(t, "scripted")))
                .collect(),
        )
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn invoke(&self, _request: ReasoningRequest) -> Result<ReasoningResult, ReasoningError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted backend ran out of responses")
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
