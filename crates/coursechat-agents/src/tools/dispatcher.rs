use std::sync::Arc;

use coursechat_common::ContextCategory;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::context::ContextProvider;
use crate::providers::ToolDefinition;
use crate::tools::{
    RETRIEVE_CONTEXT_TOOL, RetrieveContextTool, Tool, ToolContext, detect_intent,
    summarize_document,
};

/// Spoken in place of a summary when a tool call fails.
pub const TOOL_APOLOGY: &str = "I'm sorry, I couldn't look that up right now. \
     Please try again in a moment or ask me something else.";

/// Whether a turn should offer tools to the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDecision {
    pub should_use: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDecision {
    fn none() -> Self {
        Self {
            should_use: false,
            tool_name: None,
            parameters: None,
        }
    }
}

/// Outcome of one tool call. Failures are carried here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    pub success: bool,
    pub content: String,
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub category: Option<ContextCategory>,
}

impl ToolExecution {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            metadata: None,
            error: Some(error.into()),
            category: None,
        }
    }
}

pub struct ToolDispatcher {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolDispatcher {
    /// A dispatcher with the context-retrieval tool registered.
    pub fn new(provider: Arc<ContextProvider>) -> Self {
        let mut dispatcher = Self::empty();
        dispatcher.register_tool(Box::new(RetrieveContextTool::new(provider)));
        dispatcher
    }

    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register_tool(&mut self, tool: Box<dyn Tool>) {
        info!("registered tool: {}", tool.name());
        self.tools.push(tool);
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    fn find_tool(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn should_use_tool(&self, message: &str) -> ToolDecision {
        let Some(category) = detect_intent(message) else {
            return ToolDecision::none();
        };
        if self.find_tool(RETRIEVE_CONTEXT_TOOL).is_none() {
            return ToolDecision::none();
        }
        debug!(%category, "intent detected");
        ToolDecision {
            should_use: true,
            tool_name: Some(RETRIEVE_CONTEXT_TOOL.to_string()),
            parameters: Some(json!({ "context_type": category })),
        }
    }

    pub async fn execute(&self, context: &ToolContext, name: &str, params: Value) -> ToolExecution {
        let Some(tool) = self.find_tool(name) else {
            warn!("provider requested unknown tool: {}", name);
            return ToolExecution::failure(format!("unknown tool: {name}"));
        };

        match tool.execute(context, params).await {
            Ok(output) if output.is_error => ToolExecution {
                category: output.category,
                ..ToolExecution::failure(output.content)
            },
            Ok(output) => ToolExecution {
                success: true,
                content: output.content,
                metadata: output.metadata,
                error: None,
                category: output.category,
            },
            Err(e) => {
                warn!("tool {} failed: {}", name, e);
                ToolExecution::failure(e.to_string())
            }
        }
    }

    /// Short speakable text for a tool result; an apology when it failed.
    pub fn summarize(&self, execution: &ToolExecution) -> String {
        if !execution.success {
            return TOOL_APOLOGY.to_string();
        }
        summarize_document(&execution.content, execution.category)
    }
}
