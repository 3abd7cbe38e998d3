//! Relay of tsserver `rename` results into per-file edits.
//!
//! `rename` answers with locations, not edits; each location becomes a
//! replacement by the new name wrapped in the optional prefix/suffix text
//! tsserver supplies for shorthand properties and import aliases.

use serde::Deserialize;
use tsmill_foundation::{CodeEdit, FileCodeEdits, Location, TsMillError, TsMillResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameBody {
    pub info: RenameInfo,
    #[serde(default)]
    pub locs: Vec<SpanGroup>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameInfo {
    pub can_rename: bool,
    #[serde(default)]
    pub localized_error_message: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// All rename locations in one file
#[derive(Debug, Clone, Deserialize)]
pub struct SpanGroup {
    pub file: String,
    pub locs: Vec<RenameLocation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameLocation {
    pub start: Location,
    pub end: Location,
    #[serde(default)]
    pub prefix_text: Option<String>,
    #[serde(default)]
    pub suffix_text: Option<String>,
}

/// Edits renaming every location in `body` to `new_name`
pub fn rename_edits(body: &RenameBody, new_name: &str) -> TsMillResult<Vec<FileCodeEdits>> {
    if !body.info.can_rename {
        let reason = body
            .info
            .localized_error_message
            .clone()
            .unwrap_or_else(|| "This symbol cannot be renamed".to_string());
        return Err(TsMillError::server("rename", reason));
    }

    Ok(body
        .locs
        .iter()
        .map(|group| FileCodeEdits {
            file_name: group.file.clone(),
            text_changes: group
                .locs
                .iter()
                .map(|loc| CodeEdit {
                    start: loc.start,
                    end: loc.end,
                    new_text: format!(
                        "{}{}{}",
                        loc.prefix_text.as_deref().unwrap_or(""),
                        new_name,
                        loc.suffix_text.as_deref().unwrap_or("")
                    ),
                })
                .collect(),
            is_new_file: false,
        })
        .collect())
}
