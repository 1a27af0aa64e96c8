use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a conversation. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
    /// Tool output kept for display only; never sent back to the provider.
    Tool,
}

impl ChatMessage {
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            sender,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, content)
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextType {
    CourseAdvising,
    TechnicalSupport,
    GeneralInquiry,
    LearningAssistance,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::CourseAdvising => "course-advising",
            ContextType::TechnicalSupport => "technical-support",
            ContextType::GeneralInquiry => "general-inquiry",
            ContextType::LearningAssistance => "learning-assistance",
        }
    }
}

impl std::str::FromStr for ContextType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "course-advising" => Ok(ContextType::CourseAdvising),
            "technical-support" => Ok(ContextType::TechnicalSupport),
            "general-inquiry" => Ok(ContextType::GeneralInquiry),
            "learning-assistance" => Ok(ContextType::LearningAssistance),
            other => Err(crate::Error::Validation(format!(
                "unknown context type '{other}'"
            ))),
        }
    }
}

/// Where the user is and what they are doing; selects the system-prompt
/// fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    #[serde(rename = "type")]
    pub kind: ContextType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_topics: Option<Vec<String>>,
}

impl ChatContext {
    pub fn new(kind: ContextType) -> Self {
        Self {
            kind,
            current_page: None,
            user_role: None,
            previous_topics: None,
        }
    }
}

impl Default for ChatContext {
    fn default() -> Self {
        Self::new(ContextType::GeneralInquiry)
    }
}

/// Optional per-request overrides of the provider settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Inbound chat request. History is ordered oldest to newest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    #[serde(default)]
    pub context: ChatContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<RequestConfig>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_history: Vec::new(),
            context: ChatContext::default(),
            config: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_context(mut self, context: ChatContext) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_factory_assigns_id_and_timestamp() {
        let start_time = Utc::now();
        let message = ChatMessage::user("Hello, world!");
        let end_time = Utc::now();

        assert!(!message.id.is_empty());
        assert_eq!(message.sender, Sender::User);
        assert_eq!(message.content, "Hello, world!");
        assert!(message.timestamp >= start_time);
        assert!(message.timestamp <= end_time);
        assert!(message.metadata.is_none());
    }

    #[test]
    fn request_deserializes_from_camel_case_json() {
        let request: ChatRequest = serde_json::from_value(serde_json::json!({
            "message": "What does the program cost?",
            "conversationHistory": [{
                "id": "m1",
                "content": "hi",
                "sender": "user",
                "timestamp": "2026-01-01T00:00:00Z"
            }],
            "context": {"type": "course-advising", "currentPage": "/pricing"}
        }))
        .unwrap();

        assert_eq!(request.conversation_history.len(), 1);
        assert_eq!(request.context.kind, ContextType::CourseAdvising);
        assert_eq!(request.context.current_page.as_deref(), Some("/pricing"));
        assert!(request.config.is_none());
    }

    #[test]
    fn request_defaults_missing_history_and_context() {
        let request: ChatRequest =
            serde_json::from_value(serde_json::json!({"message": "hi"})).unwrap();
        assert!(request.conversation_history.is_empty());
        assert_eq!(request.context.kind, ContextType::GeneralInquiry);
    }

    #[test]
    fn unknown_context_type_is_rejected() {
        let parsed: std::result::Result<ChatContext, _> =
            serde_json::from_value(serde_json::json!({"type": "sales"}));
        assert!(parsed.is_err());
        assert!("sales".parse::<ContextType>().is_err());
    }
}
