use std::sync::Arc;
use std::time::Instant;

use coursechat_agents::{
    ContentCache, ContextProvider, DocumentStore, FsDocumentStore, GatewaySettings, LlmProvider,
    OpenAiProvider, RequestComposer, StreamGateway, ToolDispatcher,
};
use coursechat_common::{Error, Result};
use coursechat_config::AppConfig;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub type SharedState = Arc<AppState>;

/// Everything the HTTP handlers share.
pub struct AppState {
    pub config: AppConfig,
    pub gateway: Arc<StreamGateway>,
    pub context: Arc<ContextProvider>,
    /// In-flight turns by request id.
    pub turns: DashMap<String, CancellationToken>,
    /// Parent of every turn token and of the cache sweeper.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    /// Build the state around the configured OpenAI-compatible provider.
    /// Missing credentials fail here rather than on the first turn.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        if config.llm.provider != "openai" {
            return Err(Error::Config(format!(
                "unsupported provider '{}'",
                config.llm.provider
            )));
        }
        let provider = Arc::new(OpenAiProvider::from_config(&config.llm)?);
        Ok(Self::new(config, provider))
    }

    /// Documents are read from `content.dir`.
    pub fn new(config: AppConfig, provider: Arc<dyn LlmProvider>) -> Self {
        let store = Arc::new(FsDocumentStore::new(config.content.dir.clone()));
        Self::with_store(config, provider, store)
    }

    pub fn with_store(
        config: AppConfig,
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        let cache = Arc::new(ContentCache::new(
            config.cache.capacity,
            config.cache.ttl(),
        ));
        let context = Arc::new(ContextProvider::new(store, cache));
        let dispatcher = Arc::new(ToolDispatcher::new(context.clone()));
        let composer = RequestComposer::new(config.composer.clone());
        let gateway = Arc::new(StreamGateway::new(
            provider,
            composer,
            dispatcher,
            GatewaySettings::from_config(&config),
        ));

        Self {
            config,
            gateway,
            context,
            turns: DashMap::new(),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    /// Start the periodic cache sweep; it stops with [`AppState::shutdown`].
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        let interval = self.config.cache.sweep_interval();
        info!(interval_secs = interval.as_secs(), "starting cache sweeper");
        self.context
            .cache()
            .spawn_sweeper(interval, self.shutdown.child_token())
    }

    /// Cancel an in-flight turn. Returns false when the id is unknown or
    /// the turn already finished.
    pub fn cancel_turn(&self, request_id: &str) -> bool {
        match self.turns.remove(request_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
