//! Retrieval pipeline for one user turn and the generation request built from it

pub mod context;
pub mod grounding;
pub mod intent;
pub mod refine;
pub mod rules;
pub mod search;

use std::sync::Arc;

use crate::agents::{ChatMessage, GenerationRequest, TextGenerator};
use crate::app::types::{GroundingDirective, Role, SearchOutcome, Turn};
use crate::config::{Locale, PersonaConfig, PipelineConfig};
use crate::services::KnowledgeGateway;
use crate::services::persona::{NameContext, persona_prompt};

use self::grounding::{directive_message, inject};
use self::intent::IntentClassifier;
use self::refine::QueryRefiner;
use self::search::SearchOrchestrator;

/// Intent classification, search and grounding, run strictly in sequence
pub struct RetrievalPipeline {
    classifier: IntentClassifier,
    orchestrator: SearchOrchestrator,
}

impl RetrievalPipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        gateway: KnowledgeGateway,
        settings: &PipelineConfig,
    ) -> Self {
        let refiner = Arc::new(QueryRefiner::new(generator.clone(), settings));
        Self {
            classifier: IntentClassifier::new(generator, settings),
            orchestrator: SearchOrchestrator::new(gateway, refiner, settings.clone()),
        }
    }

    /// Directive for the reply to `turn_text`; `history` holds the turns before it.
    pub async fn plan_turn(&self, turn_text: &str, history: &[Turn]) -> GroundingDirective {
        let outcome = if self.classifier.classify(turn_text, history).await {
            self.orchestrator.search(turn_text, history).await
        } else {
            SearchOutcome::NotAttempted
        };
        let directive = inject(outcome);
        tracing::debug!(directive = directive_kind(&directive), "grounding chosen");
        directive
    }
}

fn directive_kind(directive: &GroundingDirective) -> &'static str {
    match directive {
        GroundingDirective::UseEvidence { .. } => "use_evidence",
        GroundingDirective::AdmitNoResult => "admit_no_result",
        GroundingDirective::AdmitSearchUnavailable => "admit_search_unavailable",
        GroundingDirective::None => "none",
    }
}

/// Everything the generation request for one turn is assembled from
pub struct TurnPrompt<'a> {
    pub persona: &'a PersonaConfig,
    pub locale: Locale,
    pub display_name: Option<&'a str>,
    pub directive: &'a GroundingDirective,
    pub history: &'a [Turn],
    pub turn_text: &'a str,
}

impl TurnPrompt<'_> {
    /// Persona message, at most one directive message, the history, then the new turn
    #[must_use]
    pub fn into_request(self) -> GenerationRequest {
        let name = NameContext::for_turn(self.display_name, self.history.is_empty());
        let mut messages = vec![ChatMessage::system(persona_prompt(
            self.persona,
            name,
            self.locale,
        ))];
        if let Some(directive) = directive_message(self.directive, self.locale) {
            messages.push(ChatMessage::system(directive));
        }
        messages.extend(self.history.iter().map(|turn| match turn.role {
            Role::User => ChatMessage::user(turn.text.clone()),
            Role::Assistant => ChatMessage::assistant(turn.text.clone()),
        }));
        messages.push(ChatMessage::user(self.turn_text));
        GenerationRequest::new(messages)
    }
}
