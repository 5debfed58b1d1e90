//! XRPC session implementation
//!
//! reqwest-based client for the `com.atproto.sync.*` endpoints of a PDS.
//! Authentication is an optional bearer token obtained elsewhere.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::traits::{RepoSession, Result, SessionError, LIST_BLOBS_PAGE_SIZE};
use crate::backup_config::ServiceConfig;
use crate::models::BlobPage;

/// XRPC session against a single PDS
pub struct XrpcSession {
    base_url: Url,
    did: Option<String>,
    access_token: Option<String>,
    http: Client,
    backoff: ExponentialBuilder,
}

impl XrpcSession {
    /// Build a session from service configuration
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let raw = config.pds_url.trim();
        if raw.is_empty() {
            return Err(SessionError::Other("PDS URL must not be empty".to_string()));
        }

        let mut url = Url::parse(raw)?;
        let is_local = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "::1"));
        if !is_local && url.scheme() != "https" {
            return Err(SessionError::Other(
                "PDS URL must use HTTPS to protect the access token (HTTP only allowed for localhost)"
                    .to_string(),
            ));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("atbackup/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(config.retry_initial_delay_ms))
            .with_max_times(config.max_retries as usize);

        Ok(Self {
            base_url: url,
            did: config.did.clone().filter(|d| !d.trim().is_empty()),
            access_token: config.access_token.clone().filter(|t| !t.trim().is_empty()),
            http,
            backoff,
        })
    }

    fn method_url(&self, method: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("xrpc/{method}"))?)
    }

    /// One GET request; non-2xx responses become `SessionError::Status`.
    async fn send(&self, method: &'static str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let url = self.method_url(method)?;
        let mut builder = self.http.get(url).query(query);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(SessionError::NotFound(format!("{method}: {body}")));
        }
        Err(SessionError::Status {
            method,
            status: status.as_u16(),
            body,
        })
    }

    async fn get_bytes(&self, method: &'static str, query: &[(&str, &str)]) -> Result<Vec<u8>> {
        let fetch = || async move {
            let resp = self.send(method, query).await?;
            Ok::<_, SessionError>(resp.bytes().await?.to_vec())
        };

        fetch
            .retry(&self.backoff)
            .when(SessionError::is_transient)
            .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        method: &'static str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let fetch = || async move {
            let resp = self.send(method, query).await?;
            Ok::<_, SessionError>(resp.json::<T>().await?)
        };

        fetch
            .retry(&self.backoff)
            .when(SessionError::is_transient)
            .await
    }
}

#[async_trait]
impl RepoSession for XrpcSession {
    fn provider_name(&self) -> &'static str {
        "xrpc"
    }

    fn did(&self) -> Option<String> {
        self.did.clone()
    }

    async fn get_repo(&self, did: &str) -> Result<Vec<u8>> {
        let bytes = self
            .get_bytes("com.atproto.sync.getRepo", &[("did", did)])
            .await?;
        tracing::debug!("[Xrpc] getRepo {} -> {} bytes", did, bytes.len());
        Ok(bytes)
    }

    async fn list_blobs(&self, did: &str, cursor: Option<&str>) -> Result<BlobPage> {
        let limit = LIST_BLOBS_PAGE_SIZE.to_string();
        let mut query = vec![("did", did), ("limit", limit.as_str())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        self.get_json("com.atproto.sync.listBlobs", &query).await
    }

    async fn get_blob(&self, did: &str, cid: &str) -> Result<Vec<u8>> {
        self.get_bytes("com.atproto.sync.getBlob", &[("did", did), ("cid", cid)])
            .await
    }
}
