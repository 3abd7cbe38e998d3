//! tsserver protocol client and the guards that run before every semantic
//! request.
//!
//! - [`client`]: one tsserver session, request/response matching, events
//! - [`readiness`]: start the session and wait (bounded) for indexing
//! - [`discovery`]: open the files that reference an edit target

pub mod client;
pub mod discovery;
pub mod framing;
pub mod process;
pub mod protocol;
pub mod readiness;
pub mod session;

pub use client::TsServerClient;
pub use discovery::{build_warning_message, scan_source_files, FileDiscovery, ScanOutcome};
pub use framing::MessageFramer;
pub use readiness::{NotReady, ReadinessGuard};
pub use session::ServerSession;

#[cfg(any(test, feature = "mocks"))]
pub use session::MockServerSession;
