//! tsserver wire messages
//!
//! Outbound requests are newline-terminated JSON. Inbound responses and
//! events arrive framed with a `Content-Length` header (see
//! [`framing`](crate::framing)).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Path as tsserver expects it: forward slashes on every platform
pub fn wire_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    if cfg!(windows) {
        text.replace('\\', "/")
    } else {
        text.into_owned()
    }
}

/// Outbound request envelope
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<&'a Value>,
}

impl<'a> Request<'a> {
    pub fn new(seq: u64, command: &'a str, arguments: Option<&'a Value>) -> Self {
        Self {
            seq,
            kind: "request",
            command,
            arguments,
        }
    }

    /// Serialize as one newline-terminated line
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Any message tsserver sends back
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Response(ResponseMessage),
    Event(EventMessage),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub seq: u64,
    pub request_seq: u64,
    pub success: bool,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventMessage {
    #[serde(default)]
    pub seq: u64,
    pub event: String,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Events that move the project-loaded latch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ProjectLoadingStart,
    ProjectLoadingFinish,
    ProjectsUpdatedInBackground,
    Other(String),
}

impl ServerEvent {
    pub fn from_name(name: &str) -> Self {
        match name {
            "projectLoadingStart" => Self::ProjectLoadingStart,
            "projectLoadingFinish" => Self::ProjectLoadingFinish,
            "projectsUpdatedInBackground" => Self::ProjectsUpdatedInBackground,
            other => Self::Other(other.to_string()),
        }
    }

    /// New latch value for this event, `None` when the latch is untouched
    pub fn loaded_transition(&self) -> Option<bool> {
        match self {
            Self::ProjectLoadingStart => Some(false),
            Self::ProjectLoadingFinish | Self::ProjectsUpdatedInBackground => Some(true),
            Self::Other(_) => None,
        }
    }
}

/// Body of a `fileReferences` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReferencesBody {
    #[serde(default)]
    pub refs: Vec<FileReference>,
    #[serde(default)]
    pub symbol_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileReference {
    pub file: String,
}

/// Body of a `projectInfo` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfoBody {
    #[serde(default)]
    pub config_file_name: Option<String>,
    #[serde(default)]
    pub file_names: Option<Vec<String>>,
}
