//! Drives one chat turn against the provider and re-encodes it as a
//! sequence of [`StreamEvent`]s.
//!
//! A turn moves through
//! `Idle -> Streaming -> [ToolPending -> ToolExecuting -> Resuming] -> Completing -> Done`,
//! and can fall into `Error` from any state. Content tokens are forwarded as
//! soon as they arrive. Tool-call fragments from the stream are only used to
//! learn that a tool is coming; once the provider finishes with
//! `tool_calls`, the well-formed call list is fetched with a second,
//! non-streaming request.
//!
//! Every turn whose reader is still attached ends with exactly one
//! [`StreamEvent::Done`]. A turn cancelled through its token ends with a
//! `CANCELLED` error frame and `Done`; a turn whose reader went away stops
//! emitting immediately.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use coursechat_common::{
    ChatRequest, CompletionMetadata, Error, Result, StreamEvent, classify,
};
use coursechat_config::AppConfig;
use futures::StreamExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::composer::RequestComposer;
use crate::providers::{LlmProvider, LlmRequest, PromptMessage, StreamContent, ToolCall};
use crate::tools::{ToolContext, ToolDispatcher, ToolExecution};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    ToolPending,
    ToolExecuting,
    Resuming,
    Completing,
    Done,
    Error,
}

/// Runtime knobs for the gateway, usually taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stream_timeout: Duration,
    pub tool_timeout: Duration,
    pub debug_tool_events: bool,
    pub max_concurrent_turns: usize,
}

impl GatewaySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm.model.clone(),
            max_tokens: Some(config.llm.max_tokens),
            temperature: Some(config.llm.temperature),
            stream_timeout: config.gateway.stream_timeout(),
            tool_timeout: config.gateway.tool_timeout(),
            debug_tool_events: config.gateway.debug_tool_events,
            max_concurrent_turns: config.gateway.max_concurrent_turns,
        }
    }
}

/// A running turn. Events arrive on `events` until the channel closes.
pub struct TurnHandle {
    pub request_id: String,
    pub events: mpsc::Receiver<StreamEvent>,
    pub task: JoinHandle<()>,
}

pub struct StreamGateway {
    provider: Arc<dyn LlmProvider>,
    composer: RequestComposer,
    dispatcher: Arc<ToolDispatcher>,
    settings: GatewaySettings,
    permits: Semaphore,
}

#[derive(Default)]
struct PendingToolCall {
    name: String,
    arguments: String,
}

/// Per-turn bookkeeping.
struct Turn {
    request_id: String,
    model: String,
    started: Instant,
    state: TurnState,
    tool_results: usize,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl Turn {
    fn transition(&mut self, next: TurnState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "turn state");
            self.state = next;
        }
    }

    /// A closed receiver means the client went away; treat it as a cancel.
    async fn emit(&self, event: StreamEvent) -> Result<()> {
        self.events.send(event).await.map_err(|_| Error::Cancelled)
    }

    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            out = fut => Ok(out),
        }
    }
}

impl StreamGateway {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        composer: RequestComposer,
        dispatcher: Arc<ToolDispatcher>,
        settings: GatewaySettings,
    ) -> Self {
        let permits = Semaphore::new(settings.max_concurrent_turns.max(1));
        Self {
            provider,
            composer,
            dispatcher,
            settings,
            permits,
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Turns that could start right now without waiting for a permit.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Validate and compose `request`, then run the turn on a background
    /// task. Validation failures are returned here, before anything is
    /// sent to the provider.
    pub fn start_turn(
        self: &Arc<Self>,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<TurnHandle> {
        let messages = self.composer.compose(&request)?;
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let gateway = Arc::clone(self);
        let span = info_span!("turn", request_id = %request_id);
        let turn = Turn {
            request_id: request_id.clone(),
            model: request
                .config
                .as_ref()
                .and_then(|c| c.model.clone())
                .unwrap_or_else(|| self.settings.model.clone()),
            started: Instant::now(),
            state: TurnState::Idle,
            tool_results: 0,
            events: tx,
            cancel,
        };

        let task = tokio::spawn(
            async move { gateway.run(turn, request, messages).await }.instrument(span),
        );

        Ok(TurnHandle {
            request_id,
            events: rx,
            task,
        })
    }

    async fn run(&self, mut turn: Turn, request: ChatRequest, messages: Vec<PromptMessage>) {
        info!(model = %turn.model, "turn started");
        match self.drive(&mut turn, &request, messages).await {
            Ok(()) => info!(
                elapsed_ms = turn.started.elapsed().as_millis() as u64,
                tool_results = turn.tool_results,
                "turn completed"
            ),
            Err(Error::Cancelled) if !turn.cancel.is_cancelled() => {
                info!(state = ?turn.state, "turn reader went away");
            }
            Err(Error::Cancelled) => {
                info!(state = ?turn.state, "turn cancelled");
                let cancelled = classify(&Error::Cancelled);
                let _ = turn
                    .emit(StreamEvent::Error {
                        message: cancelled.message,
                        kind: cancelled.kind,
                    })
                    .await;
                let _ = turn.emit(StreamEvent::Done).await;
            }
            Err(e) => {
                warn!(state = ?turn.state, "turn failed: {}", e);
                turn.transition(TurnState::Error);
                let classified = classify(&e);
                // Best effort: the receiver may already be gone.
                let _ = turn
                    .emit(StreamEvent::Error {
                        message: classified.message,
                        kind: classified.kind,
                    })
                    .await;
                let _ = turn.emit(StreamEvent::Done).await;
            }
        }
    }

    async fn drive(
        &self,
        turn: &mut Turn,
        request: &ChatRequest,
        messages: Vec<PromptMessage>,
    ) -> Result<()> {
        let _permit = turn
            .cancellable(self.permits.acquire())
            .await?
            .map_err(|_| Error::Agent("gateway is shutting down".into()))?;

        let decision = self.dispatcher.should_use_tool(&request.message);
        let overrides = request.config.clone().unwrap_or_default();
        let llm_request = LlmRequest {
            model: turn.model.clone(),
            messages,
            max_tokens: overrides.max_tokens.or(self.settings.max_tokens),
            temperature: overrides.temperature.or(self.settings.temperature),
            tools: if decision.should_use {
                self.dispatcher.tool_definitions()
            } else {
                Vec::new()
            },
        };
        debug!(
            offered_tools = llm_request.tools.len(),
            messages = llm_request.messages.len(),
            "calling provider"
        );

        turn.transition(TurnState::Streaming);
        let mut stream = turn
            .cancellable(tokio::time::timeout(
                self.settings.stream_timeout,
                self.provider.complete_stream(&llm_request),
            ))
            .await?
            .map_err(|_| Error::Timeout("provider did not open the stream in time".into()))??;

        let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();
        let mut tools_resolved = false;

        loop {
            let next = turn
                .cancellable(tokio::time::timeout(
                    self.settings.stream_timeout,
                    stream.next(),
                ))
                .await?
                .map_err(|_| Error::Timeout("provider stream went idle".into()))?;

            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            match chunk.delta {
                StreamContent::Text(text) if !text.is_empty() => {
                    turn.emit(StreamEvent::Content(text)).await?;
                }
                StreamContent::Text(_) => {}
                StreamContent::ToolUse(delta) => {
                    turn.transition(TurnState::ToolPending);
                    let call = pending.entry(delta.index).or_default();
                    if let Some(name) = delta.name {
                        call.name.push_str(&name);
                    }
                    call.arguments.push_str(&delta.input);
                }
            }

            match chunk.stop_reason.as_deref() {
                Some("tool_calls") if !tools_resolved => {
                    tools_resolved = true;
                    turn.transition(TurnState::ToolExecuting);
                    self.resolve_tools(turn, &llm_request, &pending).await?;
                    turn.transition(TurnState::Resuming);
                }
                Some("content_filter") => {
                    return Err(Error::ContentFiltered(
                        "the provider filtered this response".into(),
                    ));
                }
                _ => {}
            }
        }

        turn.transition(TurnState::Completing);
        turn.emit(StreamEvent::Completion(CompletionMetadata {
            model: turn.model.clone(),
            response_time_ms: turn.started.elapsed().as_millis() as u64,
            request_id: turn.request_id.clone(),
            tool_result_count: turn.tool_results,
            used_tools: turn.tool_results > 0,
        }))
        .await?;

        turn.transition(TurnState::Done);
        turn.emit(StreamEvent::Done).await
    }

    /// Fetch the complete tool-call list and run each call. Failures here
    /// are scoped to the affected calls and never end the turn.
    async fn resolve_tools(
        &self,
        turn: &mut Turn,
        request: &LlmRequest,
        streamed: &BTreeMap<u32, PendingToolCall>,
    ) -> Result<()> {
        let resolution = turn
            .cancellable(tokio::time::timeout(
                self.settings.tool_timeout,
                self.provider.complete(request),
            ))
            .await?;

        let response = match resolution {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("tool resolution request failed: {}", e);
                return self.fail_streamed_calls(turn, streamed, &e.to_string()).await;
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.settings.tool_timeout.as_millis() as u64,
                    "tool resolution request timed out"
                );
                return self
                    .fail_streamed_calls(turn, streamed, "tool resolution timed out")
                    .await;
            }
        };

        if response.tool_calls.is_empty() {
            debug!("resolution returned no tool calls");
            if let Some(content) = response.content.filter(|c| !c.is_empty()) {
                turn.emit(StreamEvent::Content(content)).await?;
            }
            return Ok(());
        }

        for call in response.tool_calls {
            self.run_tool_call(turn, call).await?;
        }
        Ok(())
    }

    async fn run_tool_call(&self, turn: &mut Turn, call: ToolCall) -> Result<()> {
        if self.settings.debug_tool_events {
            turn.emit(StreamEvent::ToolCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .await?;
        }

        let execution = match serde_json::from_str::<serde_json::Value>(&call.arguments) {
            Ok(args) => {
                let context = ToolContext {
                    request_id: turn.request_id.clone(),
                };
                turn.cancellable(self.dispatcher.execute(&context, &call.name, args))
                    .await?
            }
            Err(e) => {
                warn!(tool = %call.name, "unparseable tool arguments: {}", e);
                ToolExecution::failure(format!("invalid tool arguments: {e}"))
            }
        };

        debug!(tool = %call.name, success = execution.success, "tool executed");
        self.emit_tool_result(turn, call.name, &execution).await
    }

    async fn fail_streamed_calls(
        &self,
        turn: &mut Turn,
        streamed: &BTreeMap<u32, PendingToolCall>,
        reason: &str,
    ) -> Result<()> {
        let failure = ToolExecution::failure(reason);
        let mut names: Vec<String> = streamed
            .values()
            .map(|c| c.name.clone())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            names.push(
                self.dispatcher
                    .tool_definitions()
                    .first()
                    .map(|d| d.name.clone())
                    .unwrap_or_default(),
            );
        }
        for name in names {
            self.emit_tool_result(turn, name, &failure).await?;
        }
        Ok(())
    }

    async fn emit_tool_result(
        &self,
        turn: &mut Turn,
        tool_name: String,
        execution: &ToolExecution,
    ) -> Result<()> {
        let content = self.dispatcher.summarize(execution);
        turn.emit(StreamEvent::ToolResult { tool_name, content })
            .await?;
        turn.tool_results += 1;
        Ok(())
    }
}
