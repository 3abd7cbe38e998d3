//! File content as lines plus the terminator it was written with.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    /// The terminator used by the first line break; LF when there is none
    pub fn detect(content: &str) -> Self {
        match content.find('\n') {
            Some(index) if index > 0 && content.as_bytes()[index - 1] == b'\r' => LineEnding::CrLf,
            _ => LineEnding::Lf,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// Lines of a file without terminators.
///
/// For CRLF files the `\r` is stripped on parse and restored by
/// [`SourceText::join`], so edits never see it as line content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    lines: Vec<String>,
    line_ending: LineEnding,
}

impl SourceText {
    pub fn parse(content: &str) -> Self {
        let line_ending = LineEnding::detect(content);
        let lines = content
            .split('\n')
            .map(|line| match line_ending {
                LineEnding::CrLf => line.strip_suffix('\r').unwrap_or(line).to_string(),
                LineEnding::Lf => line.to_string(),
            })
            .collect();
        Self { lines, line_ending }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Same terminator, new lines. Stray `\r` left by CRLF replacement text
    /// is stripped so it is not doubled on write.
    pub fn with_lines(&self, lines: Vec<String>) -> Self {
        let lines = match self.line_ending {
            LineEnding::CrLf => lines
                .into_iter()
                .map(|mut line| {
                    if line.ends_with('\r') {
                        line.pop();
                    }
                    line
                })
                .collect(),
            LineEnding::Lf => lines,
        };
        Self {
            lines,
            line_ending: self.line_ending,
        }
    }

    pub fn join(&self) -> String {
        self.lines.join(self.line_ending.as_str())
    }
}
