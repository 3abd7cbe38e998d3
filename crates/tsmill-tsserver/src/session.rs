//! The seam between the protocol client and its consumers.
//!
//! The readiness guard, discovery and the refactor pipeline only need this
//! surface, so they take an `Arc<dyn ServerSession>` and tests substitute a
//! mock.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tsmill_foundation::TsMillResult;

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ServerSession: Send + Sync {
    /// Root the running session was started in
    async fn project_root(&self) -> Option<PathBuf>;

    async fn is_running(&self) -> bool;

    /// The two-state "project loaded" latch
    async fn is_project_loaded(&self) -> bool;

    async fn start(&self, project_root: &Path) -> TsMillResult<()>;

    /// Issue a request and wait for its response body (`None` when empty)
    async fn send_request(&self, command: &str, arguments: Option<Value>)
        -> TsMillResult<Option<Value>>;

    /// Open a file with its full on-disk content
    async fn open_file(&self, path: &Path) -> TsMillResult<()>;
}
