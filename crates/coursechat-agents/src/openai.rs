use crate::providers::{
    ChatRole, LlmProvider, LlmRequest, LlmResponse, LlmStream, LlmStreamResponse, PromptMessage,
    StreamContent, ToolCall, ToolUseDelta, Usage,
};
use async_trait::async_trait;
use bytes::Bytes;
use coursechat_common::{Error, Result};
use coursechat_config::LlmProviderConfig;
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    /// Fails with a configuration error when the key is missing, so bad
    /// credentials surface at startup instead of on the first chat turn.
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self> {
        let api_key = api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(Error::Config("provider API key is empty".to_string()));
        }

        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "provider base URL '{base_url}' must start with http:// or https://"
            )));
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    pub fn from_config(config: &LlmProviderConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            Error::Config(format!(
                "no API key configured (set llm.api_key or the {} environment variable)",
                config.api_key_env
            ))
        })?;
        Self::new(api_key, config.base_url.clone())
    }

    async fn post(&self, request: &LlmRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let openai_request = self.convert_request(request, stream);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&openai_request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let response = self.post(request, false).await?;
        let openai_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| Error::Agent(format!("Failed to parse OpenAI response: {}", e)))?;

        self.convert_response(openai_response)
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let response = self.post(request, true).await?;
        let parser = SseParser::new(response.bytes_stream());
        Ok(Box::pin(parser))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("OpenAI request timed out: {e}"))
    } else {
        Error::Network(format!("OpenAI request failed: {e}"))
    }
}

impl OpenAiProvider {
    fn convert_request(&self, request: &LlmRequest, stream: bool) -> OpenAiRequest {
        let messages = request.messages.iter().map(convert_message).collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAiTool {
                        kind: "function".to_string(),
                        function: OpenAiFunctionDefinition {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };

        let stream_options = if stream {
            Some(OpenAiStreamOptions {
                include_usage: true,
            })
        } else {
            None
        };

        OpenAiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            stream,
            stream_options,
        }
    }

    fn convert_response(&self, response: OpenAiResponse) -> Result<LlmResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Agent("No choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(LlmResponse {
            content: choice.message.content,
            tool_calls,
            model: response.model,
            usage: response.usage.map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
            stop_reason: choice.finish_reason,
        })
    }
}

fn convert_message(msg: &PromptMessage) -> OpenAiMessage {
    match msg.role {
        ChatRole::System => OpenAiMessage::System {
            content: msg.content.clone(),
        },
        ChatRole::User => OpenAiMessage::User {
            content: msg.content.clone(),
        },
        ChatRole::Assistant => OpenAiMessage::Assistant {
            content: msg.content.clone(),
        },
    }
}

// Request Types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String },
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunctionCall,
}

#[derive(Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response Types
#[derive(Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// Stream Parser
struct SseParser {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    queue: VecDeque<Result<LlmStreamResponse>>,
    finished: bool,
}

impl SseParser {
    fn new(stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: Vec::new(),
            queue: VecDeque::new(),
            finished: false,
        }
    }

    /// Pull every complete `\n\n`-delimited event out of the buffer.
    fn drain_events(&mut self) {
        loop {
            let (pos, len) = if let Some(p) = self.buffer.windows(2).position(|w| w == b"\n\n") {
                (p, 2)
            } else if let Some(p) = self.buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                (p, 4)
            } else {
                break;
            };

            let msg_bytes: Vec<u8> = self.buffer.drain(..pos).collect();
            self.buffer.drain(..len);
            self.parse_event(&msg_bytes);
        }
    }

    fn parse_event(&mut self, msg_bytes: &[u8]) {
        let Ok(msg_str) = std::str::from_utf8(msg_bytes) else {
            debug!("dropping provider event with invalid UTF-8");
            return;
        };

        for line in msg_str.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" || data.is_empty() {
                continue;
            }
            match serde_json::from_str::<OpenAiStreamChunk>(data) {
                Ok(chunk) => self.push_chunk(chunk),
                Err(e) => self
                    .queue
                    .push_back(Err(Error::Agent(format!("JSON parse error: {}", e)))),
            }
        }
    }

    fn push_chunk(&mut self, chunk: OpenAiStreamChunk) {
        for choice in chunk.choices {
            let mut yielded = false;

            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    self.queue.push_back(Ok(LlmStreamResponse {
                        delta: StreamContent::Text(content),
                        usage: None,
                        stop_reason: choice.finish_reason.clone(),
                    }));
                    yielded = true;
                }
            }

            for tc in choice.delta.tool_calls.unwrap_or_default() {
                let (name, input) = match tc.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                self.queue.push_back(Ok(LlmStreamResponse {
                    delta: StreamContent::ToolUse(ToolUseDelta {
                        index: tc.index,
                        id: tc.id,
                        name,
                        input,
                    }),
                    usage: None,
                    stop_reason: choice.finish_reason.clone(),
                }));
                yielded = true;
            }

            if !yielded {
                if let Some(reason) = choice.finish_reason {
                    self.queue.push_back(Ok(LlmStreamResponse {
                        delta: StreamContent::Text(String::new()),
                        usage: None,
                        stop_reason: Some(reason),
                    }));
                }
            }
        }

        if let Some(usage) = chunk.usage {
            self.queue.push_back(Ok(LlmStreamResponse {
                delta: StreamContent::Text(String::new()),
                usage: Some(Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                }),
                stop_reason: None,
            }));
        }
    }
}

impl Stream for SseParser {
    type Item = Result<LlmStreamResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.drain_events();
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(transport_error(e))));
                }
                Poll::Ready(None) => {
                    // Flush a trailing event that was not `\n\n` terminated.
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        let rest = std::mem::take(&mut self.buffer);
                        self.parse_event(&rest);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// Stream Response Types
#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionCall>,
}

#[derive(Deserialize)]
struct OpenAiStreamFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn parser_from(chunks: Vec<&'static str>) -> SseParser {
        let items: Vec<reqwest::Result<Bytes>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        SseParser::new(futures::stream::iter(items))
    }

    #[test]
    fn rejects_empty_api_key() {
        let err = OpenAiProvider::new("  ".to_string(), None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let err = OpenAiProvider::new("sk-test".to_string(), Some("ftp://x".into())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn from_config_requires_key() {
        let config = LlmProviderConfig::default();
        let err = OpenAiProvider::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn parser_reassembles_events_split_across_chunks() {
        let mut parser = parser_from(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel",
            "lo\"},\"finish_reason\":null}]}\n",
            "\ndata: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
        ]);

        let first = parser.next().await.unwrap().unwrap();
        assert!(matches!(first.delta, StreamContent::Text(ref t) if t == "Hello"));
        let second = parser.next().await.unwrap().unwrap();
        assert_eq!(second.stop_reason.as_deref(), Some("stop"));
        assert!(parser.next().await.is_none());
    }

    #[tokio::test]
    async fn parser_flushes_unterminated_trailing_event() {
        let mut parser = parser_from(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"},\"finish_reason\":null}]}",
        ]);
        let item = parser.next().await.unwrap().unwrap();
        assert!(matches!(item.delta, StreamContent::Text(ref t) if t == "tail"));
        assert!(parser.next().await.is_none());
    }

    #[tokio::test]
    async fn parser_emits_tool_call_fragments() {
        let mut parser = parser_from(vec![
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"retrieve_chatbot_context\",\"arguments\":\"{\\\"context\"}}]},\"finish_reason\":null}]}\n\n",
        ]);
        let item = parser.next().await.unwrap().unwrap();
        match item.delta {
            StreamContent::ToolUse(delta) => {
                assert_eq!(delta.name.as_deref(), Some("retrieve_chatbot_context"));
                assert_eq!(delta.input, "{\"context");
            }
            other => panic!("expected tool delta, got {other:?}"),
        }
    }
}
