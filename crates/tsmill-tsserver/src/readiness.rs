//! Readiness guard: make sure tsserver is running and has loaded the
//! project before a semantic request is issued.

use crate::session::ServerSession;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};
use tsmill_config::ReadinessConfig;
use tsmill_foundation::{OperationResult, TsMillError};

/// Why the guard refused to let an operation proceed
#[derive(Debug, Error)]
pub enum NotReady {
    #[error("TypeScript server is still loading the project (waited {}ms)", waited.as_millis())]
    StillIndexing { waited: Duration },

    #[error("Failed to start TypeScript server: {source}")]
    StartFailed {
        #[source]
        source: TsMillError,
    },
}

impl NotReady {
    pub fn suggestion(&self) -> &'static str {
        match self {
            NotReady::StillIndexing { .. } => {
                "Wait a few seconds and retry the operation. Large projects can take longer to index."
            }
            NotReady::StartFailed { .. } => {
                "Check that TypeScript is installed (npm install typescript) and that tsserver.command is configured correctly."
            }
        }
    }
}

impl From<NotReady> for OperationResult {
    fn from(not_ready: NotReady) -> Self {
        let suggestion = not_ready.suggestion();
        OperationResult::failure(not_ready.to_string()).with_suggestion(suggestion)
    }
}

/// Precondition check shared by every semantic operation
pub struct ReadinessGuard {
    session: Arc<dyn ServerSession>,
    project_root: PathBuf,
    poll_interval: Duration,
    default_timeout: Duration,
}

impl ReadinessGuard {
    pub fn new(session: Arc<dyn ServerSession>, project_root: impl Into<PathBuf>, config: &ReadinessConfig) -> Self {
        Self {
            session,
            project_root: project_root.into(),
            poll_interval: config.poll_interval(),
            default_timeout: config.timeout(),
        }
    }

    /// [`ensure_ready`](Self::ensure_ready) with the configured timeout
    pub async fn ensure_ready_default(&self) -> Result<(), NotReady> {
        self.ensure_ready(self.default_timeout).await
    }

    /// Start the session if needed, then poll the loaded latch until it is
    /// set or `timeout` elapses. Returns within `timeout` plus one poll tick.
    pub async fn ensure_ready(&self, timeout: Duration) -> Result<(), NotReady> {
        let started = Instant::now();

        if !self.session.is_running().await {
            info!(root = %self.project_root.display(), "Starting tsserver for readiness check");
            match self.session.start(&self.project_root).await {
                Ok(()) | Err(TsMillError::AlreadyRunning) => {}
                Err(source) => {
                    warn!(error = %source, "tsserver failed to start");
                    return Err(NotReady::StartFailed { source });
                }
            }
        }

        loop {
            if self.session.is_project_loaded().await {
                debug!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    "tsserver ready"
                );
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!(timeout_ms = timeout.as_millis() as u64, "tsserver still indexing");
                return Err(NotReady::StillIndexing { waited: timeout });
            }
            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }
}
