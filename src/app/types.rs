use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Journal entry covering turns `[from_turn, to_turn)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoSection {
    pub text: String,
    pub from_turn: usize,
    pub to_turn: usize,
    pub written_at: DateTime<Utc>,
}

/// Append-only journal; sections are never edited or reordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memo {
    sections: Vec<MemoSection>,
}

impl Memo {
    pub fn from_sections(sections: Vec<MemoSection>) -> Self {
        Self { sections }
    }

    #[must_use]
    pub fn sections(&self) -> &[MemoSection] {
        &self.sections
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&MemoSection> {
        self.sections.last()
    }

    /// Whole journal as one text block
    #[must_use]
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|section| section.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn append(&mut self, section: MemoSection) {
        self.sections.push(section);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub display_name: Option<String>,
    pub turns: Vec<Turn>,
    pub memo: Memo,
    /// Number of turns already folded into `memo`; never exceeds `turns.len()`.
    pub memo_cursor: usize,
}

impl Conversation {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            last_activity_at: now,
            display_name: None,
            turns: Vec::new(),
            memo: Memo::default(),
            memo_cursor: 0,
        }
    }

    /// Records a completed exchange and marks the conversation active
    pub fn append_exchange(&mut self, user_text: &str, assistant_text: &str, now: DateTime<Utc>) {
        self.turns.push(Turn::user(user_text));
        self.turns.push(Turn::assistant(assistant_text));
        self.updated_at = now;
        self.last_activity_at = now;
    }

    /// Turns not yet summarized
    #[must_use]
    pub fn unsummarized_turns(&self) -> &[Turn] {
        self.turns.get(self.memo_cursor..).unwrap_or_default()
    }

    /// Appends a section covering `covered` and advances the cursor to its end.
    ///
    /// Refuses unless `covered` starts at the current cursor and ends within the
    /// transcript, so a stale synthesis can never land twice.
    pub fn commit_memo_section(
        &mut self,
        text: String,
        covered: Range<usize>,
        now: DateTime<Utc>,
    ) -> bool {
        if covered.start != self.memo_cursor
            || covered.end <= covered.start
            || covered.end > self.turns.len()
        {
            return false;
        }
        self.memo.append(MemoSection {
            text,
            from_turn: covered.start,
            to_turn: covered.end,
            written_at: now,
        });
        self.memo_cursor = covered.end;
        self.updated_at = now;
        true
    }

    #[must_use]
    pub fn first_user_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.text.as_str())
    }
}

/// Query sent to the external knowledge gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub refined: bool,
}

impl SearchQuery {
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            refined: false,
        }
    }

    pub fn refined(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            refined: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub title: String,
    pub excerpt: String,
    pub source_url: String,
}

/// Normalized evidence from one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub query: String,
    pub answer: Option<String>,
    pub snippets: Vec<Snippet>,
}

impl Finding {
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.answer
            .as_deref()
            .is_some_and(|answer| !answer.trim().is_empty())
            || self
                .snippets
                .iter()
                .any(|snippet| !snippet.excerpt.trim().is_empty())
    }
}

/// Result of orchestrating the searches for one user turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Findings in candidate order, each tagged with its query
    Grounded { findings: Vec<Finding> },
    Empty,
    Failed { reason: String },
    NotAttempted,
}

/// Non-fabrication instruction attached to a generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroundingDirective {
    UseEvidence { findings: Vec<Finding> },
    AdmitNoResult,
    AdmitSearchUnavailable,
    None,
}
