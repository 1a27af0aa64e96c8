use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub llm: LlmProviderConfig,
    pub cache: CacheConfig,
    pub composer: ComposerConfig,
    pub content: ContentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on simultaneous outbound provider calls.
    pub max_concurrent_turns: usize,
    /// Applied to opening the provider stream and to each gap between chunks.
    pub stream_timeout_secs: u64,
    /// Applied to the secondary, non-streaming tool-resolution call.
    pub tool_timeout_secs: u64,
    /// Emit `tool_call` frames to clients.
    pub debug_tool_events: bool,
    pub rate_limit: RateLimitConfig,
}

impl GatewayConfig {
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3100,
            max_concurrent_turns: 8,
            stream_timeout_secs: 60,
            tool_timeout_secs: 20,
            debug_tool_events: false,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub per_second: u64,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_second: 1,
            burst_size: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmProviderConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is not set in the file.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            ttl_secs: 5 * 60,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    pub max_message_chars: usize,
    pub max_history_messages: usize,
    /// Ceiling for the estimated (chars / 4) token count of history plus
    /// the new message.
    pub max_history_tokens: usize,
    pub concise_after_turns: usize,
    pub style_hints: bool,
    /// Fixed seed for style-hint selection; random when unset.
    pub style_seed: Option<u64>,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 2000,
            max_history_messages: 10,
            max_history_tokens: 4000,
            concise_after_turns: 5,
            style_hints: true,
            style_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub dir: PathBuf,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("content"),
        }
    }
}
