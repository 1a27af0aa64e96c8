use std::net::SocketAddr;
use std::sync::Arc;

use coursechat_common::{Error, Result};
use coursechat_config::AppConfig;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::router::build_router;
use crate::state::{AppState, SharedState};

/// HTTP server for the chat gateway.
pub struct GatewayServer {
    state: SharedState,
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Result<Self> {
        Ok(Self::from_state(Arc::new(AppState::from_config(config)?)))
    }

    pub fn from_state(state: SharedState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Serve until Ctrl-C or SIGTERM, then cancel in-flight turns and the
    /// cache sweeper.
    pub async fn run(self) -> Result<()> {
        let gateway = &self.state.config.gateway;
        let addr: SocketAddr = format!("{}:{}", gateway.host, gateway.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address: {e}")))?;

        let listener = TcpListener::bind(addr).await?;
        let sweeper = self.state.spawn_cache_sweeper();
        let router = build_router(self.state.clone());

        info!(%addr, model = %self.state.config.llm.model, "chat gateway listening");

        let shutdown = self.state.shutdown.clone();
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

        self.state.shutdown.cancel();
        // The sweeper exits on cancellation; a join error only means it panicked.
        let _ = sweeper.await;
        info!("chat gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received terminate signal, shutting down"),
    }
}
