use async_trait::async_trait;
use coursechat_common::{ContextCategory, Result};

pub mod dispatcher;
pub mod intent;
pub mod retrieve_context;
pub mod summarize;

pub use dispatcher::{TOOL_APOLOGY, ToolDecision, ToolDispatcher, ToolExecution};
pub use intent::detect_intent;
pub use retrieve_context::{RETRIEVE_CONTEXT_TOOL, RetrieveContextTool};
pub use summarize::{SAFE_FALLBACK, summarize_document};

/// Per-call information handed to a tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub is_error: bool,
    /// Category of the content, when the tool knows it. Drives summary enrichment.
    pub category: Option<ContextCategory>,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>, metadata: Option<serde_json::Value>) -> Self {
        Self {
            content: content.into(),
            metadata,
            is_error: false,
            category: None,
        }
    }

    pub fn with_category(mut self, category: ContextCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            metadata: None,
            is_error: true,
            category: None,
        }
    }
}

/// A function the provider may call mid-turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object.
    fn input_schema(&self) -> serde_json::Value;

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput>;
}
