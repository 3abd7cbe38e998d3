//! Indentation normalizer
//!
//! tsserver generates declarations (extract function/constant, move to new
//! file) with a fixed four-space indent. These helpers detect the host file's
//! indent unit and re-indent generated fragments to match it.

use std::collections::HashMap;
use tsmill_foundation::TextEdit;

/// Indent unit tsserver assumes for generated code
pub const SERVICE_INDENT_UNIT: &str = "    ";

fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

/// Most frequent indentation step between consecutive non-blank lines.
///
/// Ties go to the step seen first. Empty when the file has no nesting.
pub fn detect_indent_unit<S: AsRef<str>>(lines: &[S]) -> String {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut previous: Option<&str> = None;

    for line in lines.iter().map(AsRef::as_ref) {
        if line.trim().is_empty() {
            continue;
        }
        let indent = leading_whitespace(line);

        if let Some(prev) = previous {
            let delta = if indent.len() > prev.len() {
                indent.strip_prefix(prev)
            } else if indent.len() < prev.len() {
                prev.strip_prefix(indent)
            } else {
                None
            };
            if let Some(delta) = delta {
                let first_seen = counts.len();
                counts.entry(delta).or_insert((0, first_seen)).0 += 1;
            }
        }
        previous = Some(indent);
    }

    counts
        .into_iter()
        .max_by(|(_, (count_a, seen_a)), (_, (count_b, seen_b))| {
            count_a.cmp(count_b).then(seen_b.cmp(seen_a))
        })
        .map(|(unit, _)| unit.to_string())
        .unwrap_or_default()
}

/// Nesting depth of `line` measured in `unit`s
pub fn detect_nesting_level(line: &str, unit: &str) -> usize {
    let indent = leading_whitespace(line);
    if unit == "\t" {
        indent.chars().filter(|c| *c == '\t').count()
    } else if unit.is_empty() {
        0
    } else {
        indent.len() / unit.len()
    }
}

/// Re-indent a fragment written with [`SERVICE_INDENT_UNIT`] so each level
/// uses `host_unit` instead. Leftover spaces below one level are kept, as
/// are blank lines and lines not indented with spaces.
pub fn reindent_fragment(fragment: &str, host_unit: &str) -> String {
    if host_unit.is_empty() || host_unit == SERVICE_INDENT_UNIT {
        return fragment.to_string();
    }

    fragment
        .split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                return line.to_string();
            }
            let body = line.trim_start_matches(' ');
            let spaces = line.len() - body.len();
            if spaces == 0 {
                return line.to_string();
            }
            let level = spaces / SERVICE_INDENT_UNIT.len();
            let remainder = spaces % SERVICE_INDENT_UNIT.len();
            format!("{}{}{}", host_unit.repeat(level), " ".repeat(remainder), body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Match a multi-line replacement's indentation to the file it lands in
pub fn normalize_edit_indentation(edit: &TextEdit, original_lines: &[String]) -> TextEdit {
    if !edit.new_text.contains('\n') {
        return edit.clone();
    }
    let host_unit = detect_indent_unit(original_lines);
    if host_unit.is_empty() || host_unit == SERVICE_INDENT_UNIT {
        return edit.clone();
    }

    tracing::debug!(
        host_unit = ?host_unit,
        line = edit.start_line,
        "Re-indenting generated code to match host file"
    );
    TextEdit {
        new_text: reindent_fragment(&edit.new_text, &host_unit),
        ..edit.clone()
    }
}
