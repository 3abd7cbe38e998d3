//! Edit-application engine
//!
//! Pure functions that turn tsserver's position-addressed edits into new
//! file content and a human-auditable change record, plus the helpers the
//! refactor pipeline needs around them.

pub mod engine;
pub mod indent;
pub mod lock;
pub mod rename;
pub mod text;

pub use engine::{apply_edits, build_file_changes, sort_edits};
pub use indent::{
    detect_indent_unit, detect_nesting_level, normalize_edit_indentation, reindent_fragment,
    SERVICE_INDENT_UNIT,
};
pub use lock::LockManager;
pub use rename::{rename_edits, RenameBody};
pub use text::{LineEnding, SourceText};
