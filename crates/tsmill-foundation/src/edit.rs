//! Edit types.
//!
//! tsserver describes changes as `FileCodeEdits` holding `CodeEdit`s with
//! 1-based `{line, offset}` locations. The edit engine works on the flattened
//! [`TextEdit`].

use serde::{Deserialize, Serialize};

/// 1-based line/offset position as used on the tsserver wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub offset: u32,
}

/// A single span replacement as returned by tsserver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeEdit {
    pub start: Location,
    pub end: Location,
    #[serde(default)]
    pub new_text: String,
}

/// All edits tsserver produced for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCodeEdits {
    pub file_name: String,
    #[serde(default)]
    pub text_changes: Vec<CodeEdit>,
    /// Set by tsserver when the edits create the file (e.g. move to new file)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_new_file: bool,
}

/// Position-addressed replacement of one span in one file.
///
/// Lines and offsets are 1-based, offsets counted in UTF-16 code units the
/// way tsserver counts them. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub start_line: u32,
    pub start_offset: u32,
    pub end_line: u32,
    pub end_offset: u32,
    pub new_text: String,
}

impl TextEdit {
    pub fn new(
        start_line: u32,
        start_offset: u32,
        end_line: u32,
        end_offset: u32,
        new_text: impl Into<String>,
    ) -> Self {
        Self {
            start_line,
            start_offset,
            end_line,
            end_offset,
            new_text: new_text.into(),
        }
    }

    /// Insert `new_text` at a position without removing anything
    pub fn insert(line: u32, offset: u32, new_text: impl Into<String>) -> Self {
        Self::new(line, offset, line, offset, new_text)
    }
}

impl From<CodeEdit> for TextEdit {
    fn from(edit: CodeEdit) -> Self {
        Self {
            start_line: edit.start.line,
            start_offset: edit.start.offset,
            end_line: edit.end.line,
            end_offset: edit.end.offset,
            new_text: edit.new_text,
        }
    }
}

impl From<&CodeEdit> for TextEdit {
    fn from(edit: &CodeEdit) -> Self {
        edit.clone().into()
    }
}

impl FileCodeEdits {
    /// Flatten the wire edits into engine edits, preserving their order
    pub fn to_text_edits(&self) -> Vec<TextEdit> {
        self.text_changes.iter().map(TextEdit::from).collect()
    }
}
