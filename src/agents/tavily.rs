use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agents::{SearchHit, SearchProvider, SearchRequest, SearchResponse};
use crate::error::CollaboratorError;

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

#[derive(Debug, Serialize)]
struct TavilySearchBody<'a> {
    query: &'a str,
    search_depth: &'a str,
    max_results: u32,
    include_answer: bool,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilySearchResult>,
}

#[derive(Debug, Deserialize)]
struct TavilySearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

pub struct TavilyClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl TavilyClient {
    pub fn new(api_key: &str) -> color_eyre::Result<Self> {
        Self::with_endpoint(api_key, TAVILY_SEARCH_URL)
    }

    pub fn with_endpoint(api_key: &str, endpoint: &str) -> color_eyre::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, CollaboratorError> {
        if self.api_key.trim().is_empty() {
            return Err(CollaboratorError::Unavailable(
                "tavily (api key not configured)".to_string(),
            ));
        }

        let body = TavilySearchBody {
            query: request.query.trim(),
            search_depth: request.result_depth.as_str(),
            max_results: request.max_results,
            include_answer: request.want_answer,
            include_raw_content: false,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CollaboratorError::Unavailable(format!(
                "tavily (credentials rejected: {})",
                status
            )));
        }
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Request(format!(
                "tavily error: {} {}",
                status, details
            )));
        }

        let payload: TavilySearchResponse = response
            .json()
            .await
            .map_err(|error| CollaboratorError::Protocol(error.to_string()))?;

        Ok(SearchResponse {
            answer: payload.answer.filter(|answer| !answer.trim().is_empty()),
            results: payload
                .results
                .into_iter()
                .map(|result| SearchHit {
                    title: result.title,
                    content: result.content,
                    url: result.url,
                })
                .collect(),
        })
    }
}
