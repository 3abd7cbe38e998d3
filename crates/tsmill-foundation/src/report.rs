//! Change records and operation results returned to callers.

use crate::error::TsMillError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;

/// One replayed edit: where it happened, what was there, what replaced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditLogEntry {
    /// 1-based line of the edit start
    pub line: u32,
    /// 1-based column of the edit start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub old_text: String,
    pub new_text: String,
}

/// Human-auditable log of the edits applied to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeRecord {
    /// Display name (final path segment)
    pub file_name: String,
    pub path: PathBuf,
    pub edits: Vec<EditLogEntry>,
}

/// Snapshot of how complete the cross-file view was for an operation.
///
/// Never gates an edit; only decides whether a caveat is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    pub is_fully_loaded: bool,
    pub did_scan_timeout: bool,
}

impl ProjectStatus {
    pub fn healthy() -> Self {
        Self {
            is_fully_loaded: true,
            did_scan_timeout: false,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.is_fully_loaded && !self.did_scan_timeout
    }
}

impl Default for ProjectStatus {
    fn default() -> Self {
        Self::healthy()
    }
}

/// Outward result of a refactor operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    /// Actionable remediation for failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileChangeRecord>,
    #[serde(default)]
    pub preview: bool,
}

impl OperationResult {
    pub fn success(message: impl Into<String>, files: Vec<FileChangeRecord>) -> Self {
        Self {
            success: true,
            message: message.into(),
            suggestion: None,
            files,
            preview: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            suggestion: None,
            files: Vec::new(),
            preview: false,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    /// Append a caveat sentence to the message; empty caveats are ignored
    pub fn with_warning(mut self, warning: &str) -> Self {
        if !warning.is_empty() {
            self.message.push_str("\n\n");
            self.message.push_str(warning);
        }
        self
    }

    pub fn total_edits(&self) -> usize {
        self.files.iter().map(|f| f.edits.len()).sum()
    }

    /// Render the message and per-file change log as plain text
    pub fn render(&self) -> String {
        let mut out = String::new();
        let marker = if self.success { "✅" } else { "❌" };
        let _ = writeln!(out, "{} {}", marker, self.message);
        if let Some(suggestion) = &self.suggestion {
            let _ = writeln!(out, "Suggestion: {}", suggestion);
        }
        for file in &self.files {
            let _ = writeln!(out, "\n{} ({})", file.file_name, file.path.display());
            for entry in &file.edits {
                match entry.column {
                    Some(column) => {
                        let _ = writeln!(out, "  {}:{}", entry.line, column);
                    }
                    None => {
                        let _ = writeln!(out, "  {}", entry.line);
                    }
                }
                let _ = writeln!(out, "    - {}", entry.old_text);
                let _ = writeln!(out, "    + {}", entry.new_text);
            }
        }
        out
    }
}

impl From<TsMillError> for OperationResult {
    fn from(err: TsMillError) -> Self {
        let suggestion = err.suggestion();
        let result = OperationResult::failure(err.to_string());
        match suggestion {
            Some(s) => result.with_suggestion(s),
            None => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_health() {
        assert!(ProjectStatus::default().is_healthy());
        let scanned = ProjectStatus {
            is_fully_loaded: true,
            did_scan_timeout: true,
        };
        assert!(!scanned.is_healthy());
    }

    #[test]
    fn test_error_converts_to_failed_result() {
        let result: OperationResult = TsMillError::timeout("rename", 30_000).into();
        assert!(!result.success);
        assert!(result.message.contains("rename"));
        assert!(result.suggestion.is_some());
    }

    #[test]
    fn test_render_lists_edits() {
        let result = OperationResult::success(
            "Renamed 1 occurrence",
            vec![FileChangeRecord {
                file_name: "a.ts".to_string(),
                path: PathBuf::from("/repo/a.ts"),
                edits: vec![EditLogEntry {
                    line: 1,
                    column: Some(7),
                    old_text: "oldName".to_string(),
                    new_text: "newName".to_string(),
                }],
            }],
        )
        .with_warning("");

        assert_eq!(
            result.render(),
            "✅ Renamed 1 occurrence\n\na.ts (/repo/a.ts)\n  1:7\n    - oldName\n    + newName\n"
        );
        assert_eq!(result.total_edits(), 1);
    }
}
