pub mod cache;
pub mod composer;
pub mod context;
pub mod openai;
pub mod providers;
pub mod stream;
pub mod tools;

pub use cache::{CacheStats, Clock, ContentCache, ManualClock, SystemClock};
pub use composer::{RandomStyleHints, RequestComposer, StyleHints, estimate_tokens};
pub use context::{
    CachedDocument, ContextProvider, DocumentMetadata, DocumentStore, FsDocumentStore,
    MemoryDocumentStore,
};
pub use openai::OpenAiProvider;
pub use providers::{
    ChatRole, LlmProvider, LlmRequest, LlmResponse, LlmStream, LlmStreamResponse, PromptMessage,
    StreamContent, ToolCall, ToolDefinition, ToolUseDelta, Usage,
};
pub use stream::{GatewaySettings, StreamGateway, TurnHandle, TurnState};
pub use tools::{
    RETRIEVE_CONTEXT_TOOL, SAFE_FALLBACK, TOOL_APOLOGY, ToolDecision, ToolDispatcher,
    ToolExecution, summarize_document,
};
