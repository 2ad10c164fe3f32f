use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;

use crate::agents::{ChatMessage, GenerationRequest, TextGenerator};
use crate::app::chat::agent::context::recent_context;
use crate::app::chat::agent::rules::compile;
use crate::app::types::Turn;
use crate::config::PipelineConfig;
use crate::error::with_timeout;

const REFINER_SYSTEM_PROMPT: &str = "You are a Search Query Refiner. Your goal is to generate a single, precise \
    search keyword based on the user's latest request and the conversation context. Resolve pronouns by looking \
    at previous messages. Return ONLY the keyword string. No quotes, no explanations.";
const CONTEXT_CHARS_PER_TURN: usize = 150;

/// Applied one after another, so shorter phrases see what longer ones left
const REQUEST_FRAMING: &[&str] = &[
    "你可以帮我", "帮我", "帮我查", "查一下", "查找", "搜索", "search", "look up", "find",
    "你知道", "你了解", "能否", "可以", "请", "麻烦",
];

static REQUEST_FRAMING_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    REQUEST_FRAMING
        .iter()
        .filter_map(|phrase| compile(&format!("(?i){}", regex::escape(phrase))))
        .collect()
});
static PUNCTUATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"[，。！？、；：,\.!?;:]"));

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes request phrasing and punctuation, keeping `turn_text` when nothing is left
pub fn strip_request_framing(turn_text: &str) -> String {
    let mut query = turn_text.to_string();
    for framing in REQUEST_FRAMING_PATTERNS.iter() {
        query = framing.replace_all(&query, "").into_owned();
    }
    if let Some(punctuation) = PUNCTUATION.as_ref() {
        query = punctuation.replace_all(&query, " ").into_owned();
    }
    let query = collapse_whitespace(&query);
    if query.is_empty() {
        turn_text.to_string()
    } else {
        query
    }
}

fn clean_model_query(raw: &str) -> String {
    collapse_whitespace(raw.trim().trim_matches(|character| character == '"' || character == '\''))
}

/// Turns a conversational message into a compact search query
pub struct QueryRefiner {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
    context_turns: usize,
}

impl QueryRefiner {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: &PipelineConfig) -> Self {
        Self {
            generator,
            timeout: settings.refine_timeout(),
            context_turns: settings.refine_context_turns,
        }
    }

    /// Always returns a non-empty query for a non-empty `turn_text`.
    pub async fn refine(&self, turn_text: &str, recent: &[Turn]) -> String {
        let request = self.build_request(turn_text, recent);
        match with_timeout("query refiner", self.timeout, self.generator.complete(&request)).await {
            Ok(raw) => {
                let query = clean_model_query(&raw);
                if query.is_empty() {
                    tracing::warn!("refiner returned nothing, stripping request framing");
                    return strip_request_framing(turn_text);
                }
                tracing::debug!(query = query.as_str(), "query refined");
                query
            }
            Err(error) => {
                let query = strip_request_framing(turn_text);
                tracing::warn!(%error, query = query.as_str(), "refiner failed, stripping request framing");
                query
            }
        }
    }

    fn build_request(&self, turn_text: &str, recent: &[Turn]) -> GenerationRequest {
        let context = recent_context(recent, self.context_turns, CONTEXT_CHARS_PER_TURN);
        let prompt = format!(
            "You are a Search Query Refiner.\n\
             Generate a single, precise search keyword from the user's latest request and the conversation context.\n\n\
             Rules:\n\
             1. Resolve pronouns: for \"What is its name?\" or \"它的英文名叫什么\", find the subject in previous messages.\n\
             2. Remove politeness and request phrases (\"帮我\", \"查一下\", \"搜索\", \"你可以\", \"please\", \"help me\").\n\
             3. Remove punctuation.\n\
             4. Keep the core content and object names.\n\
             5. Return ONLY the keyword string.\n\n\
             Conversation Context:\n{}\n\n\
             Latest User Message: {}\n\n\
             Examples:\n\
             - History: [User: 我喜欢阿玛尼高定系列 Bot: 哪一款？ User: 白金缮那款] Current: \"它的英文名叫什么\" -> 阿玛尼 白金缮 英文名\n\
             - \"你可以帮我查查元梦之星\" -> 元梦之星 游戏介绍\n\
             - \"帮我搜索一下孙燕姿的隐形人歌词\" -> 孙燕姿 隐形人 歌词\n\n\
             Generate the search keyword now:",
            context, turn_text
        );
        GenerationRequest::new(vec![
            ChatMessage::system(REFINER_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .with_temperature(0.3)
        .with_max_tokens(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::testing::StubGenerator;

    #[test]
    fn test_strip_request_framing() {
        assert_eq!(strip_request_framing("请帮我查一下元梦之星。"), "元梦之星");
        assert_eq!(strip_request_framing("Can you SEARCH Chanel No.5?"), "Can you Chanel No 5");
        assert_eq!(strip_request_framing("帮我查一下！"), "帮我查一下！");
    }

    #[tokio::test]
    async fn test_model_query_is_cleaned() {
        let generator = Arc::new(StubGenerator::new().completing("  \"阿玛尼   白金缮 英文名\" "));
        let refiner = QueryRefiner::new(generator.clone(), &PipelineConfig::default());
        let recent = vec![Turn::user("我喜欢阿玛尼高定系列"), Turn::assistant("哪一款？")];

        assert_eq!(refiner.refine("它的英文名叫什么", &recent).await, "阿玛尼 白金缮 英文名");
        let request = &generator.requests()[0];
        assert_eq!(request.temperature, Some(0.3));
        assert!(request.messages[1].content.contains("User: 我喜欢阿玛尼高定系列\nBot: 哪一款？"));
    }

    #[tokio::test]
    async fn test_blank_model_answer_falls_back() {
        let generator = Arc::new(StubGenerator::new().completing(" '' "));
        let refiner = QueryRefiner::new(generator, &PipelineConfig::default());
        assert_eq!(refiner.refine("麻烦搜索一下隐形人", &[]).await, "一下隐形人");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_stripping() {
        let generator = Arc::new(
            StubGenerator::new()
                .completing("never used")
                .with_completion_delay(Duration::from_secs(30)),
        );
        let refiner = QueryRefiner::new(generator, &PipelineConfig::default());
        assert_eq!(refiner.refine("你知道元梦之星吗？", &[]).await, "元梦之星吗");
    }

    #[tokio::test]
    async fn test_error_falls_back_to_stripping() {
        let generator = Arc::new(
            StubGenerator::new().failing_completion(CollaboratorError::Request("500".to_string())),
        );
        let refiner = QueryRefiner::new(generator, &PipelineConfig::default());
        assert_eq!(refiner.refine("look up Oud Wood", &[]).await, "Oud Wood");
    }
}
