//! Ordering, application and recording of text edits.
//!
//! Edits for one file are always applied from the end of the file towards
//! the start, so an applied edit never shifts the position of one that is
//! still pending. [`sort_edits`] establishes that order; [`apply_edits`] and
//! [`build_file_changes`] assume it.

use std::cmp::Reverse;
use std::path::Path;
use tsmill_foundation::{EditLogEntry, FileChangeRecord, TextEdit, TsMillError, TsMillResult};

/// New sequence ordered by descending start, then descending end, so a
/// span is applied before a zero-width insert at its start position.
/// Edits with identical spans apply later input first, which keeps their
/// text in input order. The input is left untouched.
pub fn sort_edits(edits: &[TextEdit]) -> Vec<TextEdit> {
    let mut indexed: Vec<(usize, &TextEdit)> = edits.iter().enumerate().collect();
    indexed.sort_by_key(|(index, edit)| {
        Reverse((
            edit.start_line,
            edit.start_offset,
            edit.end_line,
            edit.end_offset,
            *index,
        ))
    });
    indexed.into_iter().map(|(_, edit)| edit.clone()).collect()
}

/// Apply `sorted` edits (see [`sort_edits`]) to `lines`, returning the new
/// lines. Replacement text containing newlines becomes separate lines.
pub fn apply_edits(lines: &[String], sorted: &[TextEdit]) -> TsMillResult<Vec<String>> {
    let mut result = lines.to_vec();

    for edit in sorted {
        let span = Span::resolve(&result, edit)?;
        let start_line = &result[span.start_line];
        let end_line = &result[span.end_line];

        let mut combined =
            String::with_capacity(span.start_byte + edit.new_text.len() + end_line.len() - span.end_byte);
        combined.push_str(&start_line[..span.start_byte]);
        combined.push_str(&edit.new_text);
        combined.push_str(&end_line[span.end_byte..]);

        let replacement: Vec<String> = combined.split('\n').map(str::to_string).collect();
        result.splice(span.start_line..=span.end_line, replacement);
    }

    Ok(result)
}

/// Change record for one file: for each edit, the text it replaced in
/// `original_lines` (never in the edited result) and its replacement.
pub fn build_file_changes(original_lines: &[String], sorted: &[TextEdit], path: &Path) -> FileChangeRecord {
    let edits = sorted
        .iter()
        .map(|edit| EditLogEntry {
            line: edit.start_line,
            column: Some(edit.start_offset),
            old_text: original_text(original_lines, edit),
            new_text: edit.new_text.clone(),
        })
        .collect();

    FileChangeRecord {
        file_name: display_name(path),
        path: path.to_path_buf(),
        edits,
    }
}

/// Exact text covered by `edit` in `lines`; empty when out of range
pub fn original_text(lines: &[String], edit: &TextEdit) -> String {
    match Span::resolve(lines, edit) {
        Ok(span) if span.start_line == span.end_line => {
            lines[span.start_line][span.start_byte..span.end_byte].to_string()
        }
        Ok(span) => {
            let mut text = lines[span.start_line][span.start_byte..].to_string();
            for line in &lines[span.start_line + 1..span.end_line] {
                text.push('\n');
                text.push_str(line);
            }
            text.push('\n');
            text.push_str(&lines[span.end_line][..span.end_byte]);
            text
        }
        Err(_) => String::new(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Zero-based line indices and byte offsets of an edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start_line: usize,
    start_byte: usize,
    end_line: usize,
    end_byte: usize,
}

impl Span {
    fn resolve(lines: &[String], edit: &TextEdit) -> TsMillResult<Self> {
        let line_count = lines.len();
        let in_range = |line: u32| line >= 1 && (line as usize) <= line_count;

        if !in_range(edit.start_line) || !in_range(edit.end_line) {
            return Err(TsMillError::invalid_edit(format!(
                "lines {}-{} outside file of {} lines",
                edit.start_line, edit.end_line, line_count
            )));
        }
        if edit.end_line < edit.start_line {
            return Err(TsMillError::invalid_edit(format!(
                "end line {} before start line {}",
                edit.end_line, edit.start_line
            )));
        }

        let start_line = edit.start_line as usize - 1;
        let end_line = edit.end_line as usize - 1;
        let start_byte = utf16_offset_to_byte(&lines[start_line], edit.start_offset);
        let end_byte = utf16_offset_to_byte(&lines[end_line], edit.end_offset);

        if start_line == end_line && end_byte < start_byte {
            return Err(TsMillError::invalid_edit(format!(
                "end offset {} before start offset {} on line {}",
                edit.end_offset, edit.start_offset, edit.start_line
            )));
        }

        Ok(Self {
            start_line,
            start_byte,
            end_line,
            end_byte,
        })
    }
}

/// Byte index of a 1-based UTF-16 offset, clamped to the line length.
/// An offset inside a surrogate pair rounds up to the next char boundary.
fn utf16_offset_to_byte(line: &str, offset: u32) -> usize {
    let target = offset.saturating_sub(1) as usize;
    let mut units = 0;
    for (byte, ch) in line.char_indices() {
        if units >= target {
            return byte;
        }
        units += ch.len_utf16();
    }
    line.len()
}
