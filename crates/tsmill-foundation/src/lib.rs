//! Foundation layer - error taxonomy and the types that flow between the
//! protocol client, the edit engine and the refactor pipeline.

pub mod edit;
pub mod error;
pub mod report;

pub use edit::{CodeEdit, FileCodeEdits, Location, TextEdit};
pub use error::{TsMillError, TsMillResult};
pub use report::{EditLogEntry, FileChangeRecord, OperationResult, ProjectStatus};
