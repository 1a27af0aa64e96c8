//! Incremental decoder for the chat event stream.
//!
//! Bytes are appended to a decode buffer and only complete lines are
//! parsed; the trailing partial line is held back until more bytes arrive.
//! Exactly one assistant message is finalized per turn, no matter whether
//! the turn ends with `completion`, `[DONE]`, both, or a dropped connection
//! after partial content. A turn the gateway reports as cancelled
//! finalizes nothing.

use coursechat_common::{ChatError, ChatMessage, CompletionMetadata, ErrorKind, StreamEvent};
use tracing::{debug, warn};

/// Something the caller may want to render.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerUpdate {
    /// The assistant reply so far.
    Streaming(String),
    ToolCall { name: String, arguments: String },
    ToolResult { tool_name: String, content: String },
    Finalized(ChatMessage),
    Failed(ChatError),
    /// The gateway aborted the turn.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct StreamConsumer {
    buffer: Vec<u8>,
    response: String,
    metadata: Option<CompletionMetadata>,
    message: Option<ChatMessage>,
    error: Option<ChatError>,
    cancelled: bool,
    done: bool,
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ConsumerUpdate> {
        self.buffer.extend_from_slice(chunk);
        let mut updates = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line[..pos], &mut updates);
        }
        updates
    }

    /// The stream closed. Parse any held-back line, then finalize whatever
    /// was accumulated if the turn never finished.
    pub fn finish(&mut self) -> Vec<ConsumerUpdate> {
        let mut updates = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.process_line(&rest, &mut updates);
        }

        if !self.done && self.error.is_none() && !self.cancelled && !self.response.is_empty() {
            debug!("stream closed without completion, finalizing partial reply");
            self.finalize(&mut updates);
        }
        self.done = true;
        updates
    }

    /// The reply as accumulated so far.
    pub fn current_response(&self) -> &str {
        &self.response
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn message(&self) -> Option<&ChatMessage> {
        self.message.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn error(&self) -> Option<&ChatError> {
        self.error.as_ref()
    }

    pub fn completion(&self) -> Option<&CompletionMetadata> {
        self.metadata.as_ref()
    }

    fn process_line(&mut self, line: &[u8], updates: &mut Vec<ConsumerUpdate>) {
        if self.done {
            return;
        }
        let line = match std::str::from_utf8(line) {
            Ok(line) => line,
            Err(e) => {
                warn!("dropping non UTF-8 stream line: {}", e);
                return;
            }
        };

        match StreamEvent::parse_line(line) {
            Ok(Some(event)) => self.apply(event, updates),
            Ok(None) => {}
            Err(e) => warn!("skipping malformed frame: {}", e),
        }
    }

    fn apply(&mut self, event: StreamEvent, updates: &mut Vec<ConsumerUpdate>) {
        match event {
            StreamEvent::Content(text) => {
                self.response.push_str(&text);
                updates.push(ConsumerUpdate::Streaming(self.response.clone()));
            }
            StreamEvent::ToolCall { name, arguments } => {
                updates.push(ConsumerUpdate::ToolCall { name, arguments });
            }
            StreamEvent::ToolResult { tool_name, content } => {
                if !self.response.is_empty() {
                    self.response.push_str("\n\n");
                }
                self.response.push_str(&content);
                updates.push(ConsumerUpdate::ToolResult { tool_name, content });
                updates.push(ConsumerUpdate::Streaming(self.response.clone()));
            }
            StreamEvent::Completion(metadata) => {
                self.metadata = Some(metadata);
                self.finalize(updates);
            }
            StreamEvent::Error {
                kind: ErrorKind::Cancelled,
                message,
            } => {
                debug!("turn cancelled by the gateway: {}", message);
                self.cancelled = true;
                updates.push(ConsumerUpdate::Cancelled);
            }
            StreamEvent::Error { message, kind } => {
                let error = ChatError::new(kind, message);
                updates.push(ConsumerUpdate::Failed(error.clone()));
                self.error = Some(error);
            }
            StreamEvent::Done => {
                if self.error.is_none() && !self.cancelled {
                    self.finalize(updates);
                }
                self.done = true;
            }
        }
    }

    fn finalize(&mut self, updates: &mut Vec<ConsumerUpdate>) {
        if self.message.is_some() {
            return;
        }
        let mut message = ChatMessage::assistant(self.response.clone());
        if let Some(metadata) = &self.metadata {
            if let Ok(value) = serde_json::to_value(metadata) {
                message = message.with_metadata(value);
            }
        }
        updates.push(ConsumerUpdate::Finalized(message.clone()));
        self.message = Some(message);
    }
}
