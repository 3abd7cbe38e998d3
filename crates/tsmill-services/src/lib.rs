//! Refactor pipeline shared by the per-refactor operations.
//!
//! Every operation runs the same steps: readiness guard, dependent-file
//! discovery, one semantic request, then edit application. Failures come
//! back as an [`OperationResult`](tsmill_foundation::OperationResult), never
//! as an error.

pub mod refactor;

pub use refactor::{parse_file_edits, ApplyOptions, CommandOptions, RefactorService};
