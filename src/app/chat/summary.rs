//! Journal section synthesis for the memo writer

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, Utc};
use regex::Regex;

use crate::agents::{ChatMessage, GenerationRequest, TextGenerator};
use crate::app::chat::agent::context::truncate_chars;
use crate::app::chat::agent::rules::compile;
use crate::app::types::{Role, Turn};
use crate::config::Locale;
use crate::error::with_timeout;

const JOURNAL_SYSTEM_PROMPT: &str =
    "You are Le Nez, a French perfumer writing personal notes. Write in a poetic, concise style.";
const FALLBACK_EXCERPT_CHARS: usize = 50;

/// (month, first day, name), approximate dates of the 24 solar terms
const SOLAR_TERMS: [(u32, u32, &str); 24] = [
    (1, 5, "小寒"), (1, 20, "大寒"), (2, 4, "立春"), (2, 19, "雨水"),
    (3, 5, "惊蛰"), (3, 20, "春分"), (4, 5, "清明"), (4, 20, "谷雨"),
    (5, 5, "立夏"), (5, 21, "小满"), (6, 6, "芒种"), (6, 21, "夏至"),
    (7, 7, "小暑"), (7, 23, "大暑"), (8, 7, "立秋"), (8, 23, "处暑"),
    (9, 8, "白露"), (9, 23, "秋分"), (10, 8, "寒露"), (10, 23, "霜降"),
    (11, 7, "立冬"), (11, 22, "小雪"), (12, 7, "大雪"), (12, 22, "冬至"),
];

static WORD_COUNT_LINES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?m)\n?[ \t]*字[數数][:：]\s*\d+\s*$",
        r"(?m)\n?[ \t]*[Ww]ord\s*[Cc]ount:?\s*\d+\s*$",
    ]
    .iter()
    .filter_map(|source| compile(source))
    .collect()
});

/// Solar term in effect on the given day
pub fn solar_term(month: u32, day: u32) -> &'static str {
    SOLAR_TERMS
        .iter()
        .rev()
        .find(|(term_month, term_day, _)| (*term_month, *term_day) <= (month, day))
        .map_or("冬至", |(_, _, name)| *name)
}

/// Removes trailing "字数: 98" / "Word count: 98" lines the model likes to add
pub fn strip_word_count(text: &str) -> String {
    WORD_COUNT_LINES
        .iter()
        .fold(text.to_string(), |current, pattern| {
            pattern.replace_all(&current, "").into_owned()
        })
        .trim()
        .to_string()
}

/// Whether the section opens the journal or continues it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind<'a> {
    Full,
    Incremental { previous: &'a str },
}

/// Inputs for one journal section
pub struct JournalPrompt<'a> {
    pub kind: SectionKind<'a>,
    pub locale: Locale,
    pub persona_name: &'a str,
    pub display_name: Option<&'a str>,
    /// When the summarized turns took place
    pub happened_at: DateTime<Utc>,
    pub turns: &'a [Turn],
    pub max_user_turns: usize,
}

impl JournalPrompt<'_> {
    fn user_name(&self) -> &str {
        self.display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(match self.locale {
                Locale::Zh => "朋友",
                Locale::En => "friend",
            })
    }

    fn user_lines(&self) -> Vec<&str> {
        self.turns
            .iter()
            .filter(|turn| turn.role == Role::User)
            .map(|turn| turn.text.as_str())
            .take(self.max_user_turns)
            .collect()
    }

    fn date_and_time(&self) -> (String, String) {
        let local = self.happened_at.with_timezone(&Local);
        let date = match self.locale {
            Locale::Zh => local.format("%Y年%m月%d日"),
            Locale::En => local.format("%B %d, %Y"),
        };
        (date.to_string(), local.format("%H:%M").to_string())
    }

    fn setting(&self) -> String {
        let (date, time) = self.date_and_time();
        let local = self.happened_at.with_timezone(&Local);
        let term = solar_term(local.month(), local.day());
        match self.locale {
            Locale::Zh => format!("{} {}，{}", date, time, term),
            Locale::En => format!("{} {}, {}", date, time, term),
        }
    }

    #[must_use]
    pub fn to_request(&self) -> GenerationRequest {
        let name = self.user_name();
        let user_lines = self.user_lines().join("\n");
        let language = match self.locale {
            Locale::Zh => "用中文",
            Locale::En => "Use English",
        };
        let prompt = match self.kind {
            SectionKind::Full => format!(
                "你是一位法国调香师 {persona}，正在写手札记录一次与{name}的对话。\n\n\
                 对话发生在{setting}\n\n\
                 用户的主要信息：\n{user_lines}\n\n\
                 请用诗意、简洁的语言，以手札/备忘录的形式，总结这次对话。包括：\n\
                 1. 日期、时间和节气（可以诗意描述）\n\
                 2. {name}的心情和状态\n\
                 3. 选择的香氛或偏好\n\
                 4. 对{name}的鼓励或建议\n\n\
                 用第一人称，像在写私人笔记一样。语言要优雅、简洁，不超过150字。\n\n\
                 重要：不要在手札末尾添加字数统计。只输出手札内容本身。\n\n{language}",
                persona = self.persona_name,
                setting = self.setting(),
            ),
            SectionKind::Incremental { previous } => format!(
                "你是一位法国调香师 {persona}，正在手札中追加记录与{name}的后续对话。\n\n\
                 之前的记录：\n{previous}\n\n\
                 这次对话发生在{setting}\n\n\
                 新增对话的主要内容：\n{user_lines}\n\n\
                 请用诗意、简洁的语言，以手札/备忘录的形式，记录这次后续对话。包括：\n\
                 1. 新的日期、时间和节气（如果与之前不同）\n\
                 2. {name}的新心情和状态变化\n\
                 3. 新的香氛讨论或偏好变化\n\
                 4. 对{name}的新观察或建议\n\n\
                 用第一人称，像在写私人笔记的续篇。语言要优雅、简洁，不超过100字。可以自然地承接之前的记录。\n\n\
                 重要：不要在手札末尾添加字数统计。只输出手札内容本身。\n\n{language}",
                persona = self.persona_name,
                setting = self.setting(),
            ),
        };
        GenerationRequest::new(vec![
            ChatMessage::system(JOURNAL_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .with_temperature(0.8)
        .with_max_tokens(300)
    }

    /// Plain section used when synthesis fails, so the cursor still advances
    #[must_use]
    pub fn fallback_section(&self) -> String {
        let (date, time) = self.date_and_time();
        let user_lines = self.user_lines();
        let excerpt = user_lines
            .first()
            .map_or("...", |text| truncate_chars(text, FALLBACK_EXCERPT_CHARS));
        match self.locale {
            Locale::Zh => format!(
                "{} {}\n\n今日与{}的对话。{}\n\n记录于手札。",
                date,
                time,
                self.user_name(),
                excerpt
            ),
            Locale::En => format!(
                "{} {}\n\nConversation with {}. {}\n\nNoted in journal.",
                date,
                time,
                self.user_name(),
                excerpt
            ),
        }
    }
}

/// Writes one journal section, falling back to a plain entry on failure or empty output
pub async fn write_section(
    generator: &dyn TextGenerator,
    prompt: &JournalPrompt<'_>,
    limit: Duration,
) -> String {
    let request = prompt.to_request();
    match with_timeout("memo synthesis", limit, generator.complete(&request)).await {
        Ok(text) => {
            let section = strip_word_count(&text);
            if section.is_empty() {
                tracing::warn!("journal synthesis returned nothing, writing plain entry");
                return prompt.fallback_section();
            }
            section
        }
        Err(error) => {
            tracing::warn!(%error, "journal synthesis failed, writing plain entry");
            prompt.fallback_section()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::testing::StubGenerator;

    fn prompt<'a>(turns: &'a [Turn], kind: SectionKind<'a>, locale: Locale) -> JournalPrompt<'a> {
        JournalPrompt {
            kind,
            locale,
            persona_name: "Le Nez",
            display_name: None,
            happened_at: Utc::now(),
            turns,
            max_user_turns: 3,
        }
    }

    #[test]
    fn test_solar_term_lookup() {
        assert_eq!(solar_term(1, 3), "冬至");
        assert_eq!(solar_term(1, 5), "小寒");
        assert_eq!(solar_term(4, 19), "清明");
        assert_eq!(solar_term(10, 15), "寒露");
        assert_eq!(solar_term(12, 31), "冬至");
    }

    #[test]
    fn test_strip_word_count() {
        assert_eq!(strip_word_count("午后的雨。\n字数: 98"), "午后的雨。");
        assert_eq!(strip_word_count("午后的雨。\n\n字數：42\n"), "午后的雨。");
        assert_eq!(
            strip_word_count("Rain in the afternoon.\nWord count: 87"),
            "Rain in the afternoon."
        );
        assert_eq!(strip_word_count("no count here"), "no count here");
    }

    #[test]
    fn test_full_prompt_limits_user_turns() {
        let turns = vec![
            Turn::user("one"),
            Turn::assistant("reply"),
            Turn::user("two"),
            Turn::user("three"),
            Turn::user("four"),
        ];
        let request = prompt(&turns, SectionKind::Full, Locale::Zh).to_request();
        let body = &request.messages[1].content;
        assert!(body.contains("one\ntwo\nthree"));
        assert!(!body.contains("four"));
        assert!(body.contains("与朋友的对话"));
        assert!(body.contains("不超过150字"));
        assert_eq!(request.temperature, Some(0.8));
        assert_eq!(request.max_tokens, Some(300));
    }

    #[test]
    fn test_incremental_prompt_carries_previous_section() {
        let turns = vec![Turn::user("Back again")];
        let request = prompt(
            &turns,
            SectionKind::Incremental {
                previous: "First entry.",
            },
            Locale::En,
        )
        .to_request();
        let body = &request.messages[1].content;
        assert!(body.contains("First entry."));
        assert!(body.contains("不超过100字"));
        assert!(body.ends_with("Use English"));
    }

    #[tokio::test]
    async fn test_failed_synthesis_writes_plain_entry() {
        let generator =
            StubGenerator::new().failing_completion(CollaboratorError::Request("500".to_string()));
        let turns = vec![Turn::user("I love the smell of rain on stone")];
        let mut journal = prompt(&turns, SectionKind::Full, Locale::En);
        journal.display_name = Some("Lin");

        let section = write_section(&generator, &journal, Duration::from_secs(30)).await;

        assert!(section.contains("Conversation with Lin. I love the smell of rain on stone"));
        assert!(section.ends_with("Noted in journal."));
    }

    #[tokio::test]
    async fn test_synthesis_output_is_cleaned() {
        let generator = StubGenerator::new().completing("  雨后的石板路。\n字数: 12  ");
        let turns = vec![Turn::user("下雨了")];
        let section = write_section(
            &generator,
            &prompt(&turns, SectionKind::Full, Locale::Zh),
            Duration::from_secs(30),
        )
        .await;
        assert_eq!(section, "雨后的石板路。");
    }
}
