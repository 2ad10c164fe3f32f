//! Stub collaborators shared by unit tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::agents::{
    FragmentStream, GenerationRequest, SearchHit, SearchProvider, SearchRequest, SearchResponse,
    TextGenerator,
};
use crate::app::types::Conversation;
use crate::clock::Clock;
use crate::error::CollaboratorError;
use crate::storage::{ConversationStore, ConversationSummary, summarize};

#[derive(Clone)]
enum SearchReply {
    Answer(String),
    Empty,
    Fail(CollaboratorError),
}

/// Search provider with a fixed reply, optional latency and call accounting
pub struct ScriptedSearch {
    reply: SearchReply,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<SearchRequest>>,
}

impl ScriptedSearch {
    fn with_reply(reply: SearchReply) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answering(answer: &str) -> Self {
        Self::with_reply(SearchReply::Answer(answer.to_string()))
    }

    pub fn empty() -> Self {
        Self::with_reply(SearchReply::Empty)
    }

    pub fn failing(error: CollaboratorError) -> Self {
        Self::with_reply(SearchReply::Fail(error))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|request| request.query)
            .collect()
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            SearchReply::Answer(answer) => Ok(SearchResponse {
                answer: Some(answer.clone()),
                results: vec![SearchHit {
                    title: format!("About {}", request.query),
                    content: answer.clone(),
                    url: "https://example.com/source".to_string(),
                }],
            }),
            SearchReply::Empty => Ok(SearchResponse::default()),
            SearchReply::Fail(error) => Err(error.clone()),
        }
    }
}

/// Text generator whose replies are scripted per call kind
pub struct StubGenerator {
    completions: Mutex<Vec<Result<String, CollaboratorError>>>,
    fallback_completion: Result<String, CollaboratorError>,
    fragments: Vec<String>,
    stream_failure: Option<CollaboratorError>,
    fragment_delay: Duration,
    completion_delay: Duration,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl StubGenerator {
    pub fn new() -> Self {
        Self {
            completions: Mutex::new(Vec::new()),
            fallback_completion: Err(CollaboratorError::Unavailable("stub".to_string())),
            fragments: Vec::new(),
            stream_failure: None,
            fragment_delay: Duration::ZERO,
            completion_delay: Duration::ZERO,
            complete_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every `complete` call answers `text` unless a queued reply is pending
    pub fn completing(mut self, text: &str) -> Self {
        self.fallback_completion = Ok(text.to_string());
        self
    }

    pub fn failing_completion(mut self, error: CollaboratorError) -> Self {
        self.fallback_completion = Err(error);
        self
    }

    /// Replies consumed in order before falling back to the default reply
    pub fn then_complete(self, reply: Result<&str, CollaboratorError>) -> Self {
        self.completions
            .lock()
            .unwrap()
            .push(reply.map(str::to_string));
        self
    }

    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = delay;
        self
    }

    pub fn streaming(mut self, fragments: &[&str]) -> Self {
        self.fragments = fragments.iter().map(|fragment| fragment.to_string()).collect();
        self
    }

    /// Stream yields the scripted fragments and then this error
    pub fn stream_fails_with(mut self, error: CollaboratorError) -> Self {
        self.stream_failure = Some(error);
        self
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, CollaboratorError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.completion_delay.is_zero() {
            tokio::time::sleep(self.completion_delay).await;
        }
        let queued = {
            let mut completions = self.completions.lock().unwrap();
            (!completions.is_empty()).then(|| completions.remove(0))
        };
        queued.unwrap_or_else(|| self.fallback_completion.clone())
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, CollaboratorError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let delay = self.fragment_delay;
        let mut items: Vec<Result<String, CollaboratorError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(error) = &self.stream_failure {
            items.push(Err(error.clone()));
        }
        Ok(futures::stream::iter(items)
            .then(move |item| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }
}

/// Conversation store backed by a map
#[derive(Default)]
pub struct InMemoryStore {
    conversations: Mutex<HashMap<String, Conversation>>,
    saves: AtomicUsize,
}

impl InMemoryStore {
    pub fn with(conversation: Conversation) -> Self {
        let store = Self::default();
        store
            .conversations
            .lock()
            .unwrap()
            .insert(conversation.id.clone(), conversation);
        store
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.conversations.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn load(&self, id: &str) -> color_eyre::Result<Option<Conversation>> {
        Ok(self.get(id))
    }

    async fn save(&self, conversation: &Conversation) -> color_eyre::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn list(&self) -> color_eyre::Result<Vec<ConversationSummary>> {
        let mut summaries: Vec<ConversationSummary> = self
            .conversations
            .lock()
            .unwrap()
            .values()
            .map(summarize)
            .collect();
        summaries.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
        Ok(summaries)
    }
}

/// Wall time anchored once, then advanced by tokio's clock.
///
/// Under a paused runtime `tokio::time::advance` moves this clock too.
#[derive(Debug, Clone)]
pub struct RuntimeClock {
    anchor_wall: DateTime<Utc>,
    anchor_instant: tokio::time::Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor_instant: tokio::time::Instant::now(),
        }
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor_instant.elapsed())
            .unwrap_or(chrono::Duration::zero());
        self.anchor_wall + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_runtime_clock_follows_virtual_time() {
        let clock = RuntimeClock::new();
        let before = clock.now();
        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!((clock.now() - before).num_seconds(), 300);
    }
}
