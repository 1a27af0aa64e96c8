//! Outbound event stream framing.
//!
//! Every event is a single `data: <payload>\n\n` frame. Payloads are JSON
//! objects, except for the `[DONE]` sentinel that terminates a turn.

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::classify::ErrorKind;

pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    pub model: String,
    #[serde(rename = "responseTime")]
    pub response_time_ms: u64,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "toolResults")]
    pub tool_result_count: usize,
    #[serde(rename = "usedTools")]
    pub used_tools: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// One provider token, forwarded as-is.
    Content(String),
    /// Debug-only echo of a tool invocation.
    ToolCall { name: String, arguments: String },
    /// Summarized output of a tool call.
    ToolResult { tool_name: String, content: String },
    Completion(CompletionMetadata),
    Error { message: String, kind: ErrorKind },
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("'{kind}' frame is missing field '{field}'")]
    MissingField { kind: &'static str, field: &'static str },

    #[error("unknown frame type '{0}'")]
    UnknownType(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<String>,
    tool: Option<WireTool>,
    tool_name: Option<String>,
    metadata: Option<CompletionMetadata>,
    error: Option<String>,
    error_type: Option<String>,
}

#[derive(Deserialize)]
struct WireTool {
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl StreamEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, StreamEvent::Done)
    }

    /// Frame payload: a JSON object, or the `[DONE]` sentinel.
    pub fn payload(&self) -> String {
        let value = match self {
            StreamEvent::Content(text) => json!({ "content": text }),
            StreamEvent::ToolCall { name, arguments } => json!({
                "type": "tool_call",
                "tool": {
                    "type": "function",
                    "function": { "name": name, "arguments": arguments },
                },
            }),
            StreamEvent::ToolResult { tool_name, content } => json!({
                "content": content,
                "type": "tool_result",
                "toolName": tool_name,
            }),
            StreamEvent::Completion(metadata) => json!({
                "isComplete": true,
                "metadata": metadata,
                "type": "completion",
            }),
            StreamEvent::Error { message, kind } => json!({
                "error": message,
                "errorType": kind.wire_tag(),
                "isComplete": true,
                "type": "error",
            }),
            StreamEvent::Done => return DONE_SENTINEL.to_string(),
        };
        value.to_string()
    }

    /// Encode as a complete `data: ...\n\n` frame.
    pub fn encode(&self) -> String {
        format!("{DATA_PREFIX} {}\n\n", self.payload())
    }

    /// Parse the payload of a `data:` line.
    pub fn parse_data(data: &str) -> Result<StreamEvent, FrameError> {
        let data = data.trim();
        if data == DONE_SENTINEL {
            return Ok(StreamEvent::Done);
        }

        let frame: WireFrame =
            serde_json::from_str(data).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

        match frame.kind.as_deref() {
            None => frame
                .content
                .map(StreamEvent::Content)
                .ok_or(FrameError::MissingField {
                    kind: "content",
                    field: "content",
                }),
            Some("tool_call") => {
                let tool = frame.tool.ok_or(FrameError::MissingField {
                    kind: "tool_call",
                    field: "tool",
                })?;
                Ok(StreamEvent::ToolCall {
                    name: tool.function.name,
                    arguments: tool.function.arguments,
                })
            }
            Some("tool_result") => Ok(StreamEvent::ToolResult {
                tool_name: frame.tool_name.unwrap_or_default(),
                content: frame.content.ok_or(FrameError::MissingField {
                    kind: "tool_result",
                    field: "content",
                })?,
            }),
            Some("completion") => frame
                .metadata
                .map(StreamEvent::Completion)
                .ok_or(FrameError::MissingField {
                    kind: "completion",
                    field: "metadata",
                }),
            Some("error") => Ok(StreamEvent::Error {
                message: frame.error.unwrap_or_default(),
                kind: frame
                    .error_type
                    .as_deref()
                    .and_then(ErrorKind::from_wire_tag)
                    .unwrap_or(ErrorKind::Api),
            }),
            Some(other) => Err(FrameError::UnknownType(other.to_string())),
        }
    }

    /// Parse one complete line of the stream. Blank lines, comments and
    /// non-`data` fields yield `Ok(None)`.
    pub fn parse_line(line: &str) -> Result<Option<StreamEvent>, FrameError> {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with(':') {
            return Ok(None);
        }
        match line.strip_prefix(DATA_PREFIX) {
            Some(rest) => Self::parse_data(rest.strip_prefix(' ').unwrap_or(rest)).map(Some),
            None => Ok(None),
        }
    }
}
