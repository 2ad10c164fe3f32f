//! OpenAI-compatible chat completion client (streaming and non-streaming)

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agents::{ChatMessage, FragmentStream, GenerationRequest, TextGenerator};
use crate::config::GenerationConfig;
use crate::error::CollaboratorError;

const PROVIDER: &str = "generation service";
const RETRY_DELAYS_MS: [u64; 3] = [200, 500, 1000];
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// -- Shared request/response types --

#[derive(Debug, Serialize)]
pub struct OpenAIChatRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChatResponse {
    pub choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChoice {
    pub message: OpenAIChoiceMessage,
}

/// Content may be null for some providers
#[derive(Debug, Deserialize)]
pub struct OpenAIChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIStreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIStreamDelta {
    content: Option<String>,
}

// -- Conversion helpers --

/// Converts internal `ChatMessage` list to OpenAI-compatible messages
pub fn convert_messages(messages: &[ChatMessage]) -> Vec<OpenAIMessage> {
    messages
        .iter()
        .map(|msg| OpenAIMessage {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        })
        .collect()
}

/// Extracts the assistant reply from an OpenAI-style response
pub fn extract_reply(response: OpenAIChatResponse) -> Result<String, CollaboratorError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| CollaboratorError::Protocol("response missing content".to_string()))
}

#[derive(Debug, PartialEq)]
enum StreamItem {
    Fragment(String),
    Skip,
    Done,
    Error(CollaboratorError),
}

fn parse_stream_event(data: &str) -> StreamItem {
    let trimmed = data.trim();
    if trimmed == "[DONE]" {
        return StreamItem::Done;
    }
    if trimmed.is_empty() {
        return StreamItem::Skip;
    }
    match serde_json::from_str::<OpenAIStreamChunk>(trimmed) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map_or(StreamItem::Skip, StreamItem::Fragment),
        Err(error) => StreamItem::Error(CollaboratorError::Protocol(error.to_string())),
    }
}

/// Client for any `/chat/completions` endpoint that speaks the OpenAI protocol
pub struct OpenAICompatClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    request_timeout: Duration,
}

impl OpenAICompatClient {
    /// Only connecting is capped client-wide; streamed bodies are bounded by
    /// the caller's gap timeout, completions by `request_timeout_secs`.
    pub fn new(config: &GenerationConfig) -> color_eyre::Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, request: &GenerationRequest, stream: bool) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: self.model.clone(),
            messages: convert_messages(&request.messages),
            stream,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    fn ensure_configured(&self) -> Result<(), CollaboratorError> {
        if self.api_key.trim().is_empty() {
            return Err(CollaboratorError::Unavailable(
                "generation service (api key not configured)".to_string(),
            ));
        }
        Ok(())
    }

    async fn post(
        &self,
        body: &OpenAIChatRequest,
        timeout: Option<Duration>,
    ) -> Result<Response, CollaboratorError> {
        let mut request = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                CollaboratorError::timeout(PROVIDER, timeout.unwrap_or(CONNECT_TIMEOUT))
            } else {
                error.into()
            }
        })?;
        Ok(response)
    }
}

async fn status_error(response: Response) -> CollaboratorError {
    let status = response.status();
    let details = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return CollaboratorError::Unavailable(format!(
            "{} (credentials rejected: {})",
            PROVIDER, status
        ));
    }
    CollaboratorError::Request(format!("{} error: {} {}", PROVIDER, status, details))
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl TextGenerator for OpenAICompatClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, CollaboratorError> {
        self.ensure_configured()?;
        let body = self.build_request(request, false);

        let mut last_error: Option<CollaboratorError> = None;
        for (attempt, delay) in RETRY_DELAYS_MS.iter().enumerate() {
            match self.post(&body, Some(self.request_timeout)).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let payload: OpenAIChatResponse =
                            response.json().await.map_err(|error| {
                                if error.is_timeout() {
                                    CollaboratorError::timeout(PROVIDER, self.request_timeout)
                                } else {
                                    CollaboratorError::Protocol(error.to_string())
                                }
                            })?;
                        return extract_reply(payload);
                    }
                    if !is_retryable(status) {
                        return Err(status_error(response).await);
                    }
                    tracing::debug!(%status, attempt, "completion request retrying");
                    last_error = Some(status_error(response).await);
                }
                Err(error) => last_error = Some(error),
            }

            if attempt < RETRY_DELAYS_MS.len() - 1 {
                tokio::time::sleep(Duration::from_millis(*delay)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CollaboratorError::Request(format!("{} failed after retries", PROVIDER))
        }))
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, CollaboratorError> {
        self.ensure_configured()?;
        let body = self.build_request(request, true);
        let response = self.post(&body, None).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let fragments = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => parse_stream_event(&event.data),
                Err(error) => StreamItem::Error(CollaboratorError::Request(error.to_string())),
            })
            .take_while(|item| futures::future::ready(*item != StreamItem::Done))
            .filter_map(|item| {
                futures::future::ready(match item {
                    StreamItem::Fragment(text) => Some(Ok(text)),
                    StreamItem::Error(error) => Some(Err(error)),
                    StreamItem::Skip | StreamItem::Done => None,
                })
            })
            .boxed();
        Ok(fragments)
    }
}
