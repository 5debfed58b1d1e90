/// In-memory RepoSession for tests
/// Serves a fixed archive and blob set, with switchable failures and call counters
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::models::BlobPage;
use crate::session::{RepoSession, Result, SessionError};

pub struct MockSession {
    did: Option<String>,
    repo: std::result::Result<Vec<u8>, String>,
    blobs: Vec<(String, Vec<u8>)>,
    failing_blobs: HashSet<String>,
    list_failure: bool,
    page_size: usize,
    repo_gate: Option<Arc<Notify>>,
    pub get_repo_calls: AtomicUsize,
    pub list_blobs_calls: AtomicUsize,
    pub get_blob_calls: AtomicUsize,
}

impl MockSession {
    pub fn new(did: &str, repo: Vec<u8>) -> Self {
        Self {
            did: Some(did.to_string()),
            repo: Ok(repo),
            blobs: Vec::new(),
            failing_blobs: HashSet::new(),
            list_failure: false,
            page_size: 500,
            repo_gate: None,
            get_repo_calls: AtomicUsize::new(0),
            list_blobs_calls: AtomicUsize::new(0),
            get_blob_calls: AtomicUsize::new(0),
        }
    }

    /// A session with no account identifier
    pub fn unauthenticated() -> Self {
        Self {
            did: None,
            ..Self::new("", Vec::new())
        }
    }

    pub fn with_repo_error(mut self, message: &str) -> Self {
        self.repo = Err(message.to_string());
        self
    }

    pub fn with_blob(mut self, cid: &str, data: &[u8]) -> Self {
        self.blobs.push((cid.to_string(), data.to_vec()));
        self
    }

    /// Listed by `list_blobs`, but `get_blob` fails for it
    pub fn with_failing_blob(mut self, cid: &str) -> Self {
        self.blobs.push((cid.to_string(), Vec::new()));
        self.failing_blobs.insert(cid.to_string());
        self
    }

    pub fn with_list_failure(mut self) -> Self {
        self.list_failure = true;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// `get_repo` waits for a notification before answering
    pub fn with_repo_gate(mut self, gate: Arc<Notify>) -> Self {
        self.repo_gate = Some(gate);
        self
    }

    pub fn repo_calls(&self) -> usize {
        self.get_repo_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepoSession for MockSession {
    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn did(&self) -> Option<String> {
        self.did.clone()
    }

    async fn get_repo(&self, _did: &str) -> Result<Vec<u8>> {
        self.get_repo_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.repo_gate {
            gate.notified().await;
        }
        self.repo.clone().map_err(SessionError::Other)
    }

    async fn list_blobs(&self, _did: &str, cursor: Option<&str>) -> Result<BlobPage> {
        self.list_blobs_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_failure {
            return Err(SessionError::Status {
                method: "com.atproto.sync.listBlobs",
                status: 500,
                body: "listing unavailable".to_string(),
            });
        }

        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| SessionError::Other(format!("bad cursor {c}")))?,
            None => 0,
        };
        let end = (start + self.page_size).min(self.blobs.len());
        let cids = self.blobs[start.min(end)..end]
            .iter()
            .map(|(cid, _)| cid.clone())
            .collect();
        let cursor = (end < self.blobs.len()).then(|| end.to_string());

        Ok(BlobPage { cids, cursor })
    }

    async fn get_blob(&self, _did: &str, cid: &str) -> Result<Vec<u8>> {
        self.get_blob_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_blobs.contains(cid) {
            return Err(SessionError::Other(format!("blob {cid} unavailable")));
        }
        self.blobs
            .iter()
            .find(|(c, _)| c == cid)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| SessionError::NotFound(cid.to_string()))
    }
}
