pub mod brave;
#[path = "openai-compat.rs"]
pub mod openai_compat;
pub mod tavily;

use crate::config::{Config, ResultDepth, SearchBackend};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Incremental reply fragments from a streaming completion
pub type FragmentStream = BoxStream<'static, Result<String, CollaboratorError>>;

/// Text-generation collaborator
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Single text block for the whole reply
    async fn complete(&self, request: &GenerationRequest) -> Result<String, CollaboratorError>;

    /// Reply as a sequence of fragments; the stream ends at the end marker
    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, CollaboratorError>;
}

/// Web-search collaborator
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub result_depth: ResultDepth,
    pub max_results: u32,
    pub want_answer: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub answer: Option<String>,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub content: String,
    pub url: String,
}

/// A chat message for agent communication
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Builds the generation client from configuration
pub fn build_generator(config: &Config) -> color_eyre::Result<Arc<dyn TextGenerator>> {
    let client = openai_compat::OpenAICompatClient::new(&config.generation)?;
    Ok(Arc::new(client))
}

/// Builds the configured search provider, or `None` when no key is set
pub fn build_search_provider(
    config: &Config,
) -> color_eyre::Result<Option<Arc<dyn SearchProvider>>> {
    if !config.search.is_configured() {
        tracing::warn!("search api key missing; external knowledge is disabled");
        return Ok(None);
    }
    let provider: Arc<dyn SearchProvider> = match config.search.provider {
        SearchBackend::Tavily => Arc::new(tavily::TavilyClient::new(&config.search.api_key)?),
        SearchBackend::Brave => Arc::new(brave::BraveClient::new(&config.search.api_key)?),
    };
    Ok(Some(provider))
}
