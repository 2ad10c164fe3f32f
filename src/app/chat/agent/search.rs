use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::Instant;

use crate::app::chat::agent::context::with_latest_user_turn;
use crate::app::chat::agent::refine::QueryRefiner;
use crate::app::chat::agent::rules::{extract_candidates, is_explicit_request, needs_verification};
use crate::app::types::{Finding, SearchOutcome, SearchQuery, Turn};
use crate::config::PipelineConfig;
use crate::error::CollaboratorError;
use crate::services::KnowledgeGateway;

/// Markers of a query that still reads like a request rather than keywords
const CONVERSATIONAL_MARKERS: &[&str] = &["帮我", "查一下", "搜索", "你可以", "能否", "帮我查", "查找"];

fn looks_conversational(query: &str) -> bool {
    let lowered = query.to_lowercase();
    CONVERSATIONAL_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// How one dispatched query ended
#[derive(Debug)]
enum CallResult {
    Settled(Result<Finding, CollaboratorError>),
    /// Still in flight when the aggregate deadline passed
    Abandoned,
}

impl CallResult {
    fn is_timeout(&self) -> bool {
        match self {
            Self::Abandoned => true,
            Self::Settled(Err(error)) => error.is_timeout(),
            Self::Settled(Ok(_)) => false,
        }
    }

    fn returned(&self) -> bool {
        matches!(self, Self::Settled(Ok(_)))
    }
}

/// Runs the bounded search fan-out for one user turn
pub struct SearchOrchestrator {
    gateway: KnowledgeGateway,
    refiner: Arc<QueryRefiner>,
    settings: PipelineConfig,
}

impl SearchOrchestrator {
    pub fn new(gateway: KnowledgeGateway, refiner: Arc<QueryRefiner>, settings: PipelineConfig) -> Self {
        Self {
            gateway,
            refiner,
            settings,
        }
    }

    /// Searches for evidence the reply to `turn_text` needs.
    ///
    /// Always resolves within the search budget; running out of it is handled
    /// like every call timing out. Finding nothing is reported as `Empty` only
    /// when the user asked for a lookup or the turn names something factual;
    /// otherwise the search is treated as never having happened.
    pub async fn search(&self, turn_text: &str, recent: &[Turn]) -> SearchOutcome {
        if !self.gateway.is_available() {
            tracing::warn!("search requested but no provider is configured");
            return SearchOutcome::Failed {
                reason: "search service is not configured".to_string(),
            };
        }

        let required = is_explicit_request(turn_text) || needs_verification(turn_text);
        let budget = self.settings.search_budget();
        match tokio::time::timeout(budget, self.run(turn_text, recent, required)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(budget_ms = budget.as_millis() as u64, "search budget exhausted");
                self.timed_out_outcome(required)
            }
        }
    }

    async fn run(&self, turn_text: &str, recent: &[Turn], required: bool) -> SearchOutcome {
        let queries = self.plan_queries(turn_text, recent).await;
        tracing::info!(queries = ?queries.iter().map(|query| query.text.as_str()).collect::<Vec<_>>(), "dispatching searches");
        let results = self.dispatch(&queries).await;
        self.classify(&queries, results, required)
    }

    /// Candidate queries: rule extraction, else one refinement; deduplicated and capped.
    pub async fn plan_queries(&self, turn_text: &str, recent: &[Turn]) -> Vec<SearchQuery> {
        let mut candidates: Vec<SearchQuery> = extract_candidates(turn_text)
            .into_iter()
            .map(SearchQuery::literal)
            .collect();
        if candidates.is_empty() {
            let refined = self.refiner.refine(turn_text, recent).await;
            candidates.push(SearchQuery::refined(refined));
        }

        let mut unique: Vec<SearchQuery> = Vec::new();
        for candidate in candidates {
            let text = candidate.text.trim();
            if text.is_empty() || unique.iter().any(|known| known.text == text) {
                continue;
            }
            unique.push(SearchQuery {
                text: text.to_string(),
                refined: candidate.refined,
            });
        }
        unique.truncate(self.settings.max_queries);

        let context = with_latest_user_turn(recent, turn_text);
        let mut planned = Vec::with_capacity(unique.len());
        for query in unique {
            if looks_conversational(&query.text) {
                let refined = self.refiner.refine(&query.text, &context).await;
                tracing::debug!(from = query.text.as_str(), to = refined.as_str(), "re-refined conversational query");
                planned.push(SearchQuery::refined(refined));
            } else {
                planned.push(query);
            }
        }
        planned
    }

    /// Runs every query concurrently; results keep the query order.
    async fn dispatch(&self, queries: &[SearchQuery]) -> Vec<CallResult> {
        let per_call = self.settings.per_call_timeout();
        let deadline = Instant::now() + self.settings.aggregate_timeout();
        let started = Instant::now();

        let mut pending: FuturesUnordered<_> = queries
            .iter()
            .enumerate()
            .map(|(index, query)| async move {
                (index, self.gateway.lookup(&query.text, per_call).await)
            })
            .collect();

        let mut results: Vec<CallResult> = queries.iter().map(|_| CallResult::Abandoned).collect();
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((index, result))) => {
                    if let Some(slot) = results.get_mut(index) {
                        *slot = CallResult::Settled(result);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        abandoned = pending.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "aggregate search deadline passed, keeping finished calls"
                    );
                    break;
                }
            }
        }
        results
    }

    fn classify(
        &self,
        queries: &[SearchQuery],
        results: Vec<CallResult>,
        required: bool,
    ) -> SearchOutcome {
        let settled_count = results.iter().filter(|result| result.returned()).count();
        let timeout_count = results.iter().filter(|result| result.is_timeout()).count();
        let mut first_error: Option<CollaboratorError> = None;
        let mut findings = Vec::new();
        for result in results {
            match result {
                CallResult::Settled(Ok(finding)) if finding.has_content() => findings.push(finding),
                CallResult::Settled(Ok(_)) | CallResult::Abandoned => {}
                CallResult::Settled(Err(error)) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        if !findings.is_empty() {
            tracing::info!(grounded = findings.len(), total = queries.len(), "search grounded");
            return SearchOutcome::Grounded { findings };
        }
        if settled_count == 0
            && timeout_count == 0
            && let Some(error) = first_error
        {
            tracing::warn!(%error, "every search call failed");
            return SearchOutcome::Failed {
                reason: error.to_string(),
            };
        }
        if settled_count == 0 && timeout_count > 0 && self.settings.timeouts_count_as_failure {
            return self.timed_out_outcome(required);
        }
        tracing::info!(
            total = queries.len(),
            timeouts = timeout_count,
            required,
            "search found nothing"
        );
        nothing_found(required)
    }

    fn timed_out_outcome(&self, required: bool) -> SearchOutcome {
        if self.settings.timeouts_count_as_failure {
            SearchOutcome::Failed {
                reason: "search timed out".to_string(),
            }
        } else {
            nothing_found(required)
        }
    }
}

fn nothing_found(required: bool) -> SearchOutcome {
    if required {
        SearchOutcome::Empty
    } else {
        SearchOutcome::NotAttempted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::testing::{ScriptedSearch, StubGenerator};
    use std::time::Duration;

    fn orchestrator(
        search: Option<Arc<ScriptedSearch>>,
        generator: Arc<StubGenerator>,
        settings: PipelineConfig,
    ) -> SearchOrchestrator {
        let provider = search.map(|search| search as Arc<dyn crate::agents::SearchProvider>);
        let gateway = KnowledgeGateway::new(provider, SearchConfig::default());
        let refiner = Arc::new(QueryRefiner::new(generator, &settings));
        SearchOrchestrator::new(gateway, refiner, settings)
    }

    #[tokio::test]
    async fn test_lyric_request_is_grounded() {
        let search = Arc::new(ScriptedSearch::answering("我的爱 是隐形人"));
        let generator = Arc::new(StubGenerator::new());
        let orchestrator = orchestrator(Some(search.clone()), generator.clone(), PipelineConfig::default());

        let outcome = orchestrator.search("帮我查一下《隐形人》歌词", &[]).await;

        let SearchOutcome::Grounded { findings } = outcome else {
            panic!("expected grounded outcome, got {:?}", outcome);
        };
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].query, "隐形人 歌词 lyrics");
        assert_eq!(search.queries(), vec!["隐形人 歌词 lyrics".to_string()]);
        assert_eq!(generator.complete_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_results_are_empty_outcome() {
        let search = Arc::new(ScriptedSearch::empty());
        let orchestrator = orchestrator(Some(search), Arc::new(StubGenerator::new()), PipelineConfig::default());
        assert_eq!(
            orchestrator.search("帮我查一下《隐形人》歌词", &[]).await,
            SearchOutcome::Empty
        );
    }

    #[tokio::test]
    async fn test_missing_provider_fails() {
        let orchestrator = orchestrator(None, Arc::new(StubGenerator::new()), PipelineConfig::default());
        assert!(matches!(
            orchestrator.search("《隐形人》歌词", &[]).await,
            SearchOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_provider_errors_fail() {
        let search = Arc::new(ScriptedSearch::failing(CollaboratorError::Unavailable(
            "tavily".to_string(),
        )));
        let orchestrator = orchestrator(Some(search), Arc::new(StubGenerator::new()), PipelineConfig::default());
        let outcome = orchestrator.search("《隐形人》歌词", &[]).await;
        assert_eq!(
            outcome,
            SearchOutcome::Failed {
                reason: "tavily is unavailable".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_refines_when_no_rule_matches() {
        let search = Arc::new(ScriptedSearch::answering("A mobile party game"));
        let generator = Arc::new(StubGenerator::new().completing("元梦之星 游戏介绍"));
        let orchestrator = orchestrator(Some(search.clone()), generator.clone(), PipelineConfig::default());

        let outcome = orchestrator.search("你知道元梦之星吗", &[]).await;

        assert!(matches!(outcome, SearchOutcome::Grounded { .. }));
        assert_eq!(search.queries(), vec!["元梦之星 游戏介绍".to_string()]);
        assert_eq!(generator.complete_calls(), 1);
    }

    #[tokio::test]
    async fn test_unrequested_search_that_finds_nothing_is_dropped() {
        let search = Arc::new(ScriptedSearch::empty());
        let generator = Arc::new(StubGenerator::new().completing("雨天 好心情"));
        let orchestrator = orchestrator(Some(search.clone()), generator, PipelineConfig::default());

        let outcome = orchestrator.search("今天下雨，心情有点低落", &[]).await;

        assert_eq!(outcome, SearchOutcome::NotAttempted);
        assert_eq!(search.queries(), vec!["雨天 好心情".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrequested_search_that_times_out_is_dropped() {
        let slow = Arc::new(ScriptedSearch::answering("late").with_delay(Duration::from_secs(9)));
        let generator = Arc::new(StubGenerator::new().completing("雨天 好心情"));
        let orchestrator = orchestrator(Some(slow), generator, PipelineConfig::default());

        assert_eq!(
            orchestrator.search("今天下雨，心情有点低落", &[]).await,
            SearchOutcome::NotAttempted
        );
    }

    #[tokio::test]
    async fn test_candidates_are_deduplicated_and_capped() {
        let search = Arc::new(ScriptedSearch::answering("notes of oud"));
        let generator = Arc::new(StubGenerator::new());
        let orchestrator = orchestrator(Some(search.clone()), generator, PipelineConfig::default());

        let queries = orchestrator
            .plan_queries("“蕴藉风流”这个典故和 Tom Ford Oud Wood 香水有关吗", &[])
            .await;

        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].text, "蕴藉风流 出处 来源 典故");
        assert!(!queries[0].refined);
    }

    #[tokio::test]
    async fn test_conversational_candidates_are_refined_with_turn_context() {
        let generator = Arc::new(StubGenerator::new().completing("孙燕姿 隐形人 歌词"));
        let orchestrator = orchestrator(
            Some(Arc::new(ScriptedSearch::empty())),
            generator.clone(),
            PipelineConfig::default(),
        );

        let queries = orchestrator.plan_queries("“帮我查隐形人”的歌词", &[]).await;

        assert_eq!(queries, vec![SearchQuery::refined("孙燕姿 隐形人 歌词")]);
        let request = &generator.requests()[0];
        assert!(request.messages[1].content.contains("User: “帮我查隐形人”的歌词"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_is_bounded_in_width_and_time() {
        let settings = PipelineConfig {
            per_call_timeout_secs: 30,
            ..PipelineConfig::default()
        };
        let search = Arc::new(ScriptedSearch::answering("late").with_delay(Duration::from_secs(60)));
        let orchestrator = orchestrator(Some(search.clone()), Arc::new(StubGenerator::new()), settings);
        let started = Instant::now();

        let outcome = orchestrator
            .search("《隐形人》的歌词 and the Tom Ford Oud Wood perfume", &[])
            .await;

        assert_eq!(outcome, SearchOutcome::Empty);
        assert_eq!(search.calls(), 2);
        assert!(search.max_in_flight() <= 2);
        assert!(started.elapsed() <= Duration::from_secs(12) + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_never_grounded() {
        let slow = Arc::new(ScriptedSearch::answering("late").with_delay(Duration::from_secs(9)));
        let strict = PipelineConfig {
            timeouts_count_as_failure: true,
            ..PipelineConfig::default()
        };

        let lenient = orchestrator(Some(slow.clone()), Arc::new(StubGenerator::new()), PipelineConfig::default());
        assert_eq!(lenient.search("《隐形人》歌词", &[]).await, SearchOutcome::Empty);

        let strict = orchestrator(Some(slow), Arc::new(StubGenerator::new()), strict);
        assert_eq!(
            strict.search("《隐形人》歌词", &[]).await,
            SearchOutcome::Failed {
                reason: "search timed out".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_calls_survive_the_aggregate_deadline() {
        let settings = PipelineConfig {
            per_call_timeout_secs: 20,
            aggregate_timeout_secs: 3,
            ..PipelineConfig::default()
        };
        let search = Arc::new(ScriptedSearch::answering("found").with_delay(Duration::from_secs(1)));
        let orchestrator = orchestrator(Some(search), Arc::new(StubGenerator::new()), settings);

        let outcome = orchestrator.search("《隐形人》歌词", &[]).await;
        assert!(matches!(outcome, SearchOutcome::Grounded { .. }));
    }
}
