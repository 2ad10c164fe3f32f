//! External knowledge gateway: one timeout-bounded call to the search
//! collaborator, normalized into a [`Finding`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agents::{SearchHit, SearchProvider, SearchRequest, SearchResponse};
use crate::app::types::{Finding, Snippet};
use crate::config::{ResultDepth, SearchConfig};
use crate::error::{CollaboratorError, with_timeout};

const ANSWER_REFERENCE_LIMIT: usize = 2;
const RESULT_LIMIT: usize = 3;
const EXCERPT_CHAR_LIMIT: usize = 400;

#[derive(Clone)]
pub struct KnowledgeGateway {
    provider: Option<Arc<dyn SearchProvider>>,
    settings: SearchConfig,
}

impl KnowledgeGateway {
    pub fn new(provider: Option<Arc<dyn SearchProvider>>, settings: SearchConfig) -> Self {
        Self { provider, settings }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    fn provider(&self) -> Result<&Arc<dyn SearchProvider>, CollaboratorError> {
        self.provider.as_ref().ok_or_else(|| {
            CollaboratorError::Unavailable("search service (not configured)".to_string())
        })
    }

    /// Searches `query`, giving up after `limit`.
    ///
    /// A blank query never reaches the provider and yields an empty finding.
    pub async fn lookup(&self, query: &str, limit: Duration) -> Result<Finding, CollaboratorError> {
        let provider = self.provider()?;
        let clean_query = query.trim();
        if clean_query.is_empty() {
            tracing::debug!("skipping blank search query");
            return Ok(empty_finding(query));
        }

        let request = SearchRequest {
            query: clean_query.to_string(),
            result_depth: self.settings.result_depth,
            max_results: self.settings.max_results,
            want_answer: self.settings.want_answer,
        };
        let started = Instant::now();
        let response = with_timeout("search", limit, provider.search(&request)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match response {
            Ok(response) => {
                let finding = normalize(clean_query, response);
                tracing::debug!(
                    provider = provider.name(),
                    query = clean_query,
                    elapsed_ms,
                    has_content = finding.has_content(),
                    "search finished"
                );
                Ok(finding)
            }
            Err(error) => {
                tracing::warn!(
                    provider = provider.name(),
                    query = clean_query,
                    elapsed_ms,
                    %error,
                    "search failed"
                );
                Err(error)
            }
        }
    }

    /// Advanced-depth search returning up to `max_results` raw hits that carry
    /// content, untruncated and without a synthesized answer.
    pub async fn deep_search(
        &self,
        query: &str,
        max_results: u32,
        limit: Duration,
    ) -> Result<Vec<SearchHit>, CollaboratorError> {
        let provider = self.provider()?;
        let request = SearchRequest {
            query: query.trim().to_string(),
            result_depth: ResultDepth::Advanced,
            max_results,
            want_answer: false,
        };
        let response = with_timeout("search", limit, provider.search(&request)).await?;
        let hits: Vec<SearchHit> = response
            .results
            .into_iter()
            .filter(|hit| !hit.content.trim().is_empty())
            .take(max_results as usize)
            .collect();
        tracing::debug!(
            provider = provider.name(),
            query = request.query.as_str(),
            hits = hits.len(),
            "deep search finished"
        );
        Ok(hits)
    }
}

fn empty_finding(query: &str) -> Finding {
    Finding {
        query: query.to_string(),
        answer: None,
        snippets: Vec::new(),
    }
}

/// Prefers the provider's answer (with a couple of references); otherwise
/// keeps the top results that carry content, with truncated excerpts.
pub fn normalize(query: &str, response: SearchResponse) -> Finding {
    let answer = response
        .answer
        .map(|answer| answer.trim().to_string())
        .filter(|answer| !answer.is_empty());

    let snippets = if answer.is_some() {
        response
            .results
            .into_iter()
            .filter(|hit| !hit.title.trim().is_empty())
            .take(ANSWER_REFERENCE_LIMIT)
            .map(|hit| Snippet {
                title: hit.title.trim().to_string(),
                excerpt: String::new(),
                source_url: hit.url.trim().to_string(),
            })
            .collect()
    } else {
        response
            .results
            .into_iter()
            .take(RESULT_LIMIT)
            .filter(|hit| !hit.content.trim().is_empty())
            .map(|hit| Snippet {
                title: hit.title.trim().to_string(),
                excerpt: hit.content.trim().chars().take(EXCERPT_CHAR_LIMIT).collect(),
                source_url: hit.url.trim().to_string(),
            })
            .collect()
    };

    Finding {
        query: query.to_string(),
        answer,
        snippets,
    }
}
