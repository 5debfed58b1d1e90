//! Account session module
//!
//! The orchestrator only talks to an account through [`RepoSession`]:
//! - **XrpcSession**: plain XRPC calls against a PDS (`com.atproto.sync.*`)
//! - test doubles in `test_utils`
//!
//! ## Example
//! ```rust,ignore
//! use atbackup_lib::session::{create_session, RepoSession};
//!
//! let session = create_session(&config.service)?;
//! let car = session.get_repo(&session.did().unwrap()).await?;
//! ```

mod traits;
mod xrpc;

pub use traits::{RepoSession, Result, SessionError, LIST_BLOBS_PAGE_SIZE};
pub use xrpc::XrpcSession;

use std::sync::Arc;

use crate::backup_config::ServiceConfig;

/// Create the session described by configuration
pub fn create_session(config: &ServiceConfig) -> Result<Arc<dyn RepoSession>> {
    let session = XrpcSession::new(config)?;
    tracing::info!(
        "[Session] {} session for {} ({})",
        session.provider_name(),
        session.did().as_deref().unwrap_or("<unauthenticated>"),
        config.pds_url
    );
    Ok(Arc::new(session))
}
