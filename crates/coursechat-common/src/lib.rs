pub mod category;
pub mod classify;
pub mod error;
pub mod event;
pub mod message;

pub use category::ContextCategory;
pub use classify::{ChatError, ErrorKind, Severity, classify};
pub use error::{Error, Result};
pub use event::{CompletionMetadata, DONE_SENTINEL, FrameError, StreamEvent};
pub use message::{
    ChatContext, ChatMessage, ChatRequest, ContextType, RequestConfig, Sender,
};
