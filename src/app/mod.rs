pub mod chat;
pub mod history;
pub mod locks;
pub mod types;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::agents::{SearchProvider, TextGenerator};
use crate::clock::Clock;
use crate::config::Config;
use crate::services::KnowledgeGateway;
use crate::services::scent::{ScentAnalyzer, ScentError, ScentReport};
use crate::storage::ConversationStore;

use self::chat::agent::RetrievalPipeline;
use self::chat::memo::{MemoScheduler, MemoWriter};
use self::locks::ConversationLocks;

/// One user turn submitted to the engine
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    /// Existing conversation to continue; a new id is minted when absent
    pub conversation_id: Option<String>,
    pub text: String,
    /// Name the caller already knows the user by
    pub display_name: Option<String>,
}

/// Owns every collaborator handle; built once at startup and cloned into turn tasks.
#[derive(Clone)]
pub struct ChatEngine {
    config: Arc<Config>,
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn TextGenerator>,
    pipeline: Arc<RetrievalPipeline>,
    locks: ConversationLocks,
    clock: Arc<dyn Clock>,
    scheduler: MemoScheduler,
    memo_writer: Arc<MemoWriter>,
    scent: Arc<ScentAnalyzer>,
}

impl ChatEngine {
    /// Wires the engine and starts the memo timer task, whose handle is returned.
    pub fn new(
        config: Config,
        store: Arc<dyn ConversationStore>,
        generator: Arc<dyn TextGenerator>,
        search: Option<Arc<dyn SearchProvider>>,
        clock: Arc<dyn Clock>,
    ) -> (Self, JoinHandle<()>) {
        let locks = ConversationLocks::default();
        let gateway = KnowledgeGateway::new(search, config.search.clone());
        let scent = Arc::new(ScentAnalyzer::new(
            generator.clone(),
            gateway.clone(),
            config.locale,
        ));
        let pipeline = Arc::new(RetrievalPipeline::new(
            generator.clone(),
            gateway,
            &config.pipeline,
        ));
        let memo_writer = Arc::new(MemoWriter::new(
            store.clone(),
            generator.clone(),
            locks.clone(),
            clock.clone(),
            config.memo.clone(),
            config.locale,
            config.persona.name.clone(),
        ));
        let (scheduler, timers) =
            MemoScheduler::start(memo_writer.clone(), config.memo.inactivity_window());

        let engine = Self {
            config: Arc::new(config),
            store,
            generator,
            pipeline,
            locks,
            clock,
            scheduler,
            memo_writer,
            scent,
        };
        (engine, timers)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Web-grounded profile of a perfume, outside any conversation
    pub async fn analyze_scent(&self, name: &str) -> Result<ScentReport, ScentError> {
        self.scent.analyze(name).await
    }
}

/// Fresh conversation id, unique to the microsecond
#[must_use]
pub fn new_conversation_id(now: DateTime<Utc>) -> String {
    format!("conv-{}", now.format("%Y%m%d%H%M%S%6f"))
}
