use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::agents::{SearchHit, SearchProvider, SearchRequest, SearchResponse};
use crate::error::CollaboratorError;

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

#[derive(Debug, Deserialize)]
struct BraveWebResponse {
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    results: Vec<BraveSearchResult>,
}

#[derive(Debug, Deserialize)]
struct BraveSearchResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

/// Brave web search. Has no answer summary and ignores result depth.
pub struct BraveClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl BraveClient {
    pub fn new(api_key: &str) -> color_eyre::Result<Self> {
        Self::with_endpoint(api_key, BRAVE_SEARCH_URL)
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
impl SearchProvider for BraveClient {
    fn name(&self) -> &'static str {
        "brave"
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, CollaboratorError> {
        if self.api_key.trim().is_empty() {
            return Err(CollaboratorError::Unavailable(
                "brave (api key not configured)".to_string(),
            ));
        }
        let trimmed_query = request.query.trim();
        let count = request.max_results.to_string();

        let response = self
            .client
            .get(&self.endpoint)
            .header("X-Subscription-Token", &self.api_key)
            .query(&[
                ("q", trimmed_query),
                ("source", "web"),
                ("count", count.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CollaboratorError::Unavailable(format!(
                "brave (credentials rejected: {})",
                status
            )));
        }
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Request(format!(
                "brave error: {} {}",
                status, details
            )));
        }

        let payload: BraveWebResponse = response
            .json()
            .await
            .map_err(|error| CollaboratorError::Protocol(error.to_string()))?;
        let results = payload.web.map(|web| web.results).unwrap_or_default();

        Ok(SearchResponse {
            answer: None,
            results: results
                .into_iter()
                .map(|result| SearchHit {
                    title: result.title.trim().to_string(),
                    content: result.description.trim().to_string(),
                    url: result.url.trim().to_string(),
                })
                .collect(),
        })
    }
}
