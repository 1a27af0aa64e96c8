use std::sync::Arc;

use async_trait::async_trait;
use coursechat_common::{ContextCategory, Error, Result};
use serde_json::json;

use crate::context::ContextProvider;
use crate::tools::{Tool, ToolContext, ToolOutput};

pub const RETRIEVE_CONTEXT_TOOL: &str = "retrieve_chatbot_context";

const PARAMETER: &str = "context_type";

/// Looks up the reference document for one category.
pub struct RetrieveContextTool {
    provider: Arc<ContextProvider>,
}

impl RetrieveContextTool {
    pub fn new(provider: Arc<ContextProvider>) -> Self {
        Self { provider }
    }

    /// Check `args` against the declared schema: an object with exactly one
    /// string field, `context_type`, drawn from the category set.
    pub fn parse_args(args: &serde_json::Value) -> Result<ContextCategory> {
        let object = args
            .as_object()
            .ok_or_else(|| Error::Validation("tool arguments must be a JSON object".into()))?;

        if let Some(extra) = object.keys().find(|k| k.as_str() != PARAMETER) {
            return Err(Error::Validation(format!("unexpected argument '{extra}'")));
        }

        let value = object
            .get(PARAMETER)
            .ok_or_else(|| Error::Validation(format!("missing required argument '{PARAMETER}'")))?;

        let name = value
            .as_str()
            .ok_or_else(|| Error::Validation(format!("'{PARAMETER}' must be a string")))?;

        name.parse()
    }
}

#[async_trait]
impl Tool for RetrieveContextTool {
    fn name(&self) -> &'static str {
        RETRIEVE_CONTEXT_TOOL
    }

    fn description(&self) -> &'static str {
        "Retrieve reference information about the school's programs. Call this when the \
         user asks about curriculum, programs, projects, pricing, schedule, requirements, \
         support, enrollment, outcomes or other frequently asked questions."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                PARAMETER: {
                    "type": "string",
                    "enum": ContextCategory::names(),
                    "description": "The category of information to retrieve."
                }
            },
            "required": [PARAMETER],
            "additionalProperties": false
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let category = Self::parse_args(&args)?;
        let document = self.provider.retrieve_category(category).await?;
        let metadata = serde_json::to_value(&document.metadata)?;
        Ok(ToolOutput::success(document.content, Some(metadata)).with_category(category))
    }
}
