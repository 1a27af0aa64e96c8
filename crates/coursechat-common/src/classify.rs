//! Maps provider and transport failures onto the closed error taxonomy the
//! client understands.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Network,
    Api,
    Validation,
    Timeout,
    RateLimit,
    Configuration,
    ContentFiltered,
    /// The caller aborted the turn. Not a failure of the assistant.
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Api | ErrorKind::RateLimit
        )
    }

    /// Wire tag used in the `errorType` field of error frames.
    pub fn wire_tag(&self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK",
            ErrorKind::Api => "API",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::ContentFiltered => "CONTENT_FILTERED",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        let kind = match tag {
            "NETWORK" => ErrorKind::Network,
            "API" => ErrorKind::Api,
            "VALIDATION" => ErrorKind::Validation,
            "TIMEOUT" => ErrorKind::Timeout,
            "RATE_LIMIT" => ErrorKind::RateLimit,
            "CONFIGURATION" => ErrorKind::Configuration,
            "CONTENT_FILTERED" => ErrorKind::ContentFiltered,
            "CANCELLED" => ErrorKind::Cancelled,
            _ => return None,
        };
        Some(kind)
    }

    fn severity(&self) -> Severity {
        match self {
            ErrorKind::Validation | ErrorKind::Cancelled => Severity::Low,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit => Severity::Medium,
            ErrorKind::Api | ErrorKind::ContentFiltered => Severity::High,
            ErrorKind::Configuration => Severity::Critical,
        }
    }

    fn suggested_action(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Check your internet connection and try again.",
            ErrorKind::Api => "The assistant is having trouble right now. Please try again in a moment.",
            ErrorKind::Validation => "Please shorten or rephrase your message and send it again.",
            ErrorKind::Timeout => "The response took too long. Please try again.",
            ErrorKind::RateLimit => "Too many requests right now. Wait a few seconds before trying again.",
            ErrorKind::Configuration => "The assistant is not configured correctly. Please contact support.",
            ErrorKind::ContentFiltered => "Your message could not be processed. Please rephrase it.",
            ErrorKind::Cancelled => "The request was cancelled. Send a new message to continue.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Api => "api",
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate-limit",
            ErrorKind::Configuration => "configuration",
            ErrorKind::ContentFiltered => "content-filtered",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// User-facing failure with enough information to decide on a retry
/// affordance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub severity: Severity,
    pub suggested_action: String,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
            severity: kind.severity(),
            suggested_action: kind.suggested_action().to_string(),
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl std::error::Error for ChatError {}

/// Classify an internal error into the user-facing taxonomy.
pub fn classify(error: &Error) -> ChatError {
    let kind = match error {
        Error::Config(_) => ErrorKind::Configuration,
        Error::Validation(_) => ErrorKind::Validation,
        Error::Provider { status, message } => kind_for_status(*status, message),
        Error::Network(_) => ErrorKind::Network,
        Error::Timeout(_) => ErrorKind::Timeout,
        Error::ContentFiltered(_) => ErrorKind::ContentFiltered,
        Error::Cancelled => ErrorKind::Cancelled,
        Error::Agent(message) | Error::Tool(message) => kind_from_message(message),
        Error::Io(_) | Error::NotFound(_) | Error::Serialization(_) => ErrorKind::Api,
    };
    ChatError::new(kind, error.to_string())
}

fn kind_for_status(status: u16, body: &str) -> ErrorKind {
    let body = body.to_ascii_lowercase();
    if body.contains("content_filter") || body.contains("content management policy") {
        return ErrorKind::ContentFiltered;
    }
    match status {
        429 => ErrorKind::RateLimit,
        401 | 403 => ErrorKind::Configuration,
        400 | 413 | 422 => ErrorKind::Validation,
        408 | 504 => ErrorKind::Timeout,
        _ => ErrorKind::Api,
    }
}

/// Fallback for errors that only carry a message string.
fn kind_from_message(message: &str) -> ErrorKind {
    let message = message.to_ascii_lowercase();

    if let Some(status) = extract_status_code(&message) {
        return kind_for_status(status, &message);
    }

    if ["timed out", "timeout"].iter().any(|f| message.contains(f)) {
        return ErrorKind::Timeout;
    }

    let network_fragments = [
        "connection refused",
        "connection reset",
        "connection aborted",
        "temporarily unavailable",
        "dns error",
        "network error",
    ];
    if network_fragments.iter().any(|f| message.contains(f)) {
        return ErrorKind::Network;
    }

    ErrorKind::Api
}

fn extract_status_code(message: &str) -> Option<u16> {
    for marker in ["status=", "status:", "status code"] {
        let mut search_start = 0usize;
        while let Some(offset) = message[search_start..].find(marker) {
            let after_marker = search_start + offset + marker.len();
            let digits: String = message[after_marker..]
                .trim_start()
                .chars()
                .take_while(|ch| ch.is_ascii_digit())
                .collect();

            if digits.len() >= 3 {
                if let Ok(status) = digits[..3].parse::<u16>() {
                    return Some(status);
                }
            }

            search_start = after_marker;
        }
    }
    None
}
