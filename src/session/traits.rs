//! RepoSession trait
//!
//! The capability the orchestrator needs from an authenticated account
//! session. OAuth and token refresh happen outside this crate; anything that
//! can answer these four calls can drive a backup.

use async_trait::async_trait;

use crate::models::BlobPage;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Page size requested from `com.atproto.sync.listBlobs`
pub const LIST_BLOBS_PAGE_SIZE: u32 = 500;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("XRPC {method} returned {status}: {body}")]
    Status {
        method: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid service URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            SessionError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SessionError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait RepoSession: Send + Sync {
    /// Name of the session backend (for logs)
    fn provider_name(&self) -> &'static str;

    /// Account identifier, `None` before authentication
    fn did(&self) -> Option<String>;

    /// `com.atproto.sync.getRepo`: full repository archive (CAR bytes)
    async fn get_repo(&self, did: &str) -> Result<Vec<u8>>;

    /// `com.atproto.sync.listBlobs`: one page of blob CIDs
    async fn list_blobs(&self, did: &str, cursor: Option<&str>) -> Result<BlobPage>;

    /// `com.atproto.sync.getBlob`: raw blob bytes
    async fn get_blob(&self, did: &str, cid: &str) -> Result<Vec<u8>>;

    /// Walk `list_blobs` until the server stops returning a cursor.
    ///
    /// A cursor equal to the previous one ends the walk as well, so a
    /// misbehaving server cannot loop forever.
    async fn list_all_blobs(&self, did: &str) -> Result<Vec<String>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.list_blobs(did, cursor.as_deref()).await?;
            all.extend(page.cids);

            match page.cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        Ok(all)
    }
}
