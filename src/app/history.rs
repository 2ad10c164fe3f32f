use std::path::Path;

use chrono::Local;
use color_eyre::Result;
use color_eyre::eyre::eyre;

use crate::app::ChatEngine;
use crate::app::chat::memo::MemoOutcome;
use crate::app::types::{Conversation, Role};
use crate::config::Locale;
use crate::storage::{ConversationSummary, ImportReport, import_legacy_dir};

impl ChatEngine {
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.store.list().await
    }

    /// Loads a conversation, writing its first memo section if it has none yet.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        let conversation = self.load_existing(conversation_id).await?;
        if !conversation.memo.is_empty() || conversation.turns.is_empty() {
            return Ok(conversation);
        }
        self.memo_writer.summarize_now(conversation_id).await?;
        self.load_existing(conversation_id).await
    }

    /// Summarizes any unsummarized turns right away.
    pub async fn write_memo_now(&self, conversation_id: &str) -> Result<MemoOutcome> {
        match self.memo_writer.summarize_now(conversation_id).await? {
            MemoOutcome::NotFound => Err(eyre!("No conversation with id {}", conversation_id)),
            outcome => Ok(outcome),
        }
    }

    pub async fn import_legacy(&self, dir: &Path) -> Result<ImportReport> {
        import_legacy_dir(self.store.as_ref(), dir).await
    }

    async fn load_existing(&self, conversation_id: &str) -> Result<Conversation> {
        self.store
            .load(conversation_id)
            .await?
            .ok_or_else(|| eyre!("No conversation with id {}", conversation_id))
    }
}

/// One line per conversation: id, last update, title
#[must_use]
pub fn render_listing(summaries: &[ConversationSummary], locale: Locale) -> String {
    if summaries.is_empty() {
        return match locale {
            Locale::Zh => "暂无会话。",
            Locale::En => "No conversations yet.",
        }
        .to_string();
    }
    summaries
        .iter()
        .map(|summary| {
            let journal = if summary.memo.is_some() { "  ✎" } else { "" };
            format!(
                "{}  {}  {}{}",
                summary.id,
                summary.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                summary.display_title(locale),
                journal
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Transcript followed by the journal, if any
#[must_use]
pub fn render_transcript(conversation: &Conversation, locale: Locale, persona_name: &str) -> String {
    let user_label = conversation.display_name.as_deref().unwrap_or(match locale {
        Locale::Zh => "你",
        Locale::En => "You",
    });
    let mut sections: Vec<String> = conversation
        .turns
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                Role::User => user_label,
                Role::Assistant => persona_name,
            };
            format!("{}: {}", speaker, turn.text)
        })
        .collect();
    if !conversation.memo.is_empty() {
        let heading = match locale {
            Locale::Zh => "── 手札 ──",
            Locale::En => "── Journal ──",
        };
        sections.push(format!("{}\n{}", heading, conversation.memo.render()));
    }
    sections.join("\n\n")
}
