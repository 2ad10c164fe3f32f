use std::sync::Arc;
use std::time::Duration;

use crate::agents::{ChatMessage, GenerationRequest, TextGenerator};
use crate::app::chat::agent::context::recent_context;
use crate::app::types::Turn;
use crate::config::PipelineConfig;
use crate::error::with_timeout;

const INTENT_SYSTEM_PROMPT: &str = "You are an Intent Classifier. Return only 'YES' or 'NO'.";
const CONTEXT_CHARS_PER_TURN: usize = 100;

/// Phrases that mean the reply needs outside facts, checked before any model call
const FAST_PATH_TRIGGERS: &[&str] = &[
    "搜索", "查一下", "查找", "帮我查", "能否搜索", "search", "lookup", "find",
    "歌词", "lyrics", "是谁", "哪一年", "什么时候", "where", "when", "who",
    "你知道", "知道", "了解", "你了解", "你听说过", "听说过",
    "英文名", "全名", "叫什么", "哪里买", "价格", "多少钱", "how much", "price", "buy",
    "where to buy",
];

/// Broader list used once the classification call has failed
const FALLBACK_TRIGGERS: &[&str] = &[
    "搜索", "search", "查", "查找", "帮我查", "能否搜索",
    "歌词", "lyrics", "是谁", "哪一年", "什么时候", "where", "when", "who",
    "你知道", "知道", "了解", "你了解", "你听说过", "听说过",
    "品牌", "brand", "香水", "perfume", "fragrance",
    "英文名", "全名", "叫什么", "哪里买", "价格",
];

fn contains_any(text: &str, triggers: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    triggers.iter().any(|trigger| lowered.contains(trigger))
}

pub fn matches_fast_path(turn_text: &str) -> bool {
    contains_any(turn_text, FAST_PATH_TRIGGERS)
}

pub fn matches_fallback(turn_text: &str) -> bool {
    contains_any(turn_text, FALLBACK_TRIGGERS)
}

/// Decides whether a turn needs external knowledge
pub struct IntentClassifier {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
    context_turns: usize,
}

impl IntentClassifier {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: &PipelineConfig) -> Self {
        Self {
            generator,
            timeout: settings.intent_timeout(),
            context_turns: settings.intent_context_turns,
        }
    }

    /// Never fails: a failed or slow model call degrades to the keyword heuristic.
    pub async fn classify(&self, turn_text: &str, recent: &[Turn]) -> bool {
        if matches_fast_path(turn_text) {
            tracing::debug!("intent fast path matched");
            return true;
        }

        let request = self.build_request(turn_text, recent);
        match with_timeout("intent classifier", self.timeout, self.generator.complete(&request))
            .await
        {
            Ok(answer) => {
                let needs_search = answer.trim().to_uppercase() == "YES";
                tracing::debug!(answer = answer.trim(), needs_search, "intent classified");
                needs_search
            }
            Err(error) => {
                let needs_search = matches_fallback(turn_text);
                tracing::warn!(%error, needs_search, "intent call failed, using keyword fallback");
                needs_search
            }
        }
    }

    fn build_request(&self, turn_text: &str, recent: &[Turn]) -> GenerationRequest {
        let context = recent_context(recent, self.context_turns, CONTEXT_CHARS_PER_TURN);
        let prompt = format!(
            "You are an Intent Classifier. Analyze the user's latest message and conversation context.\n\
             Does the user need EXTERNAL KNOWLEDGE (real-time data, specific lyrics, news, facts, celebrity info) to get a good answer?\n\n\
             Conversation Context:\n{}\n\n\
             Latest User Message: {}\n\n\
             Examples:\n\
             - \"Hi\" -> NO\n\
             - \"I am sad\" -> NO\n\
             - \"Who won the game yesterday?\" -> YES\n\
             - \"Lyrics of 'Yesterday'\" -> YES\n\
             - \"Recommend a perfume\" -> NO (the persona can handle this internally)\n\
             - \"Analyze this perfume: Oud Wood\" -> YES (needs factual data)\n\
             - \"聊聊《驾鹤西去》\" -> YES (needs lyrics or song info)\n\
             - \"What is Chanel No. 5?\" -> YES (needs factual perfume data)\n\
             - \"它的英文名叫什么\" -> YES (needs to resolve the pronoun from context)\n\n\
             Return ONLY the word \"YES\" or \"NO\".",
            context, turn_text
        );
        GenerationRequest::new(vec![
            ChatMessage::system(INTENT_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .with_temperature(0.0)
        .with_max_tokens(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::testing::StubGenerator;

    fn classifier(generator: Arc<StubGenerator>) -> IntentClassifier {
        IntentClassifier::new(generator, &PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_fast_path_skips_model_call() {
        let generator = Arc::new(StubGenerator::new().completing("NO"));
        let classifier = classifier(generator.clone());

        assert!(classifier.classify("帮我查一下《隐形人》歌词", &[]).await);
        assert!(classifier.classify("Who wrote Chanel No. 5?", &[]).await);
        assert_eq!(generator.complete_calls(), 0);
    }

    #[tokio::test]
    async fn test_model_answer_is_parsed_case_insensitively() {
        let generator = Arc::new(
            StubGenerator::new()
                .then_complete(Ok(" yes \n"))
                .then_complete(Ok("NO")),
        );
        let classifier = classifier(generator.clone());
        let recent = vec![Turn::user("我喜欢白金缮"), Turn::assistant("很美")];

        assert!(classifier.classify("聊聊《驾鹤西去》", &recent).await);
        assert!(!classifier.classify("I feel tired today", &recent).await);
        assert_eq!(generator.complete_calls(), 2);

        let request = &generator.requests()[0];
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.max_tokens, Some(10));
        assert!(request.messages[1].content.contains("User: 我喜欢白金缮\nBot: 很美"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_model_degrades_within_timeout() {
        let generator = Arc::new(
            StubGenerator::new()
                .completing("YES")
                .with_completion_delay(Duration::from_secs(60)),
        );
        let classifier = classifier(generator);
        let started = tokio::time::Instant::now();

        // "香水" is only in the broader list
        assert!(classifier.classify("推荐一款香水", &[]).await);
        assert!(!classifier.classify("I feel tired today", &[]).await);
        assert!(started.elapsed() <= Duration::from_secs(10) + Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_failed_model_uses_keyword_fallback() {
        let generator = Arc::new(
            StubGenerator::new()
                .failing_completion(CollaboratorError::Unavailable("llm".to_string())),
        );
        let classifier = classifier(generator);
        assert!(classifier.classify("Tell me about this brand", &[]).await);
        assert!(!classifier.classify("今天有点累", &[]).await);
    }
}
