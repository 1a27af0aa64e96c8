//! Configuration is a leaf crate: it knows nothing about chat types and is
//! injected into the components that need it.

pub mod error;
pub mod loader;
pub mod model;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use model::{
    AppConfig, CacheConfig, ComposerConfig, ContentConfig, GatewayConfig, LlmProviderConfig,
    RateLimitConfig,
};
