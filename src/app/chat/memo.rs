//! Deferred journal memos.
//!
//! [`MemoScheduler`] is a timer service: each submitted conversation id gets
//! one pending timer, re-armed when the id is submitted again. On expiry the
//! [`MemoWriter`] reloads the conversation and appends a section only when the
//! inactivity window has really elapsed and there are unsummarized turns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;

use crate::agents::TextGenerator;
use crate::app::chat::summary::{JournalPrompt, SectionKind, write_section};
use crate::app::locks::ConversationLocks;
use crate::clock::Clock;
use crate::config::{Locale, MemoConfig};
use crate::storage::ConversationStore;

/// What a memo pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoOutcome {
    NotFound,
    /// Activity within the window; a later timer owns this conversation
    StillActive,
    NothingNew,
    Appended { cursor: usize },
    /// Another writer advanced the cursor while this section was being written
    Superseded,
}

pub struct MemoWriter {
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn TextGenerator>,
    locks: ConversationLocks,
    clock: Arc<dyn Clock>,
    settings: MemoConfig,
    locale: Locale,
    persona_name: String,
}

impl MemoWriter {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        generator: Arc<dyn TextGenerator>,
        locks: ConversationLocks,
        clock: Arc<dyn Clock>,
        settings: MemoConfig,
        locale: Locale,
        persona_name: String,
    ) -> Self {
        Self {
            store,
            generator,
            locks,
            clock,
            settings,
            locale,
            persona_name,
        }
    }

    /// Timer entry point: summarizes only after a full quiet window.
    pub async fn check_and_summarize(&self, conversation_id: &str) -> Result<MemoOutcome> {
        self.summarize(conversation_id, true).await
    }

    /// Summarizes pending turns right away, ignoring the inactivity window.
    pub async fn summarize_now(&self, conversation_id: &str) -> Result<MemoOutcome> {
        self.summarize(conversation_id, false).await
    }

    async fn summarize(&self, conversation_id: &str, require_quiet: bool) -> Result<MemoOutcome> {
        let Some(conversation) = self.store.load(conversation_id).await? else {
            return Ok(MemoOutcome::NotFound);
        };

        if require_quiet {
            let quiet_for = self.clock.now() - conversation.last_activity_at;
            let window = chrono::Duration::from_std(self.settings.inactivity_window())?;
            if quiet_for < window {
                tracing::debug!(
                    conversation_id,
                    quiet_secs = quiet_for.num_seconds(),
                    "conversation still active, skipping memo"
                );
                return Ok(MemoOutcome::StillActive);
            }
        }

        let covered = conversation.memo_cursor..conversation.turns.len();
        if covered.is_empty() {
            return Ok(MemoOutcome::NothingNew);
        }

        let kind = match conversation.memo.last() {
            Some(previous) => SectionKind::Incremental {
                previous: &previous.text,
            },
            None => SectionKind::Full,
        };
        let happened_at = match kind {
            SectionKind::Full => conversation.created_at,
            SectionKind::Incremental { .. } => conversation.last_activity_at,
        };
        let prompt = JournalPrompt {
            kind,
            locale: self.locale,
            persona_name: &self.persona_name,
            display_name: conversation.display_name.as_deref(),
            happened_at,
            turns: conversation.unsummarized_turns(),
            max_user_turns: self.settings.max_user_turns_in_prompt,
        };
        let section = write_section(
            self.generator.as_ref(),
            &prompt,
            self.settings.summary_timeout(),
        )
        .await;

        let _guard = self.locks.acquire(conversation_id).await;
        let Some(mut latest) = self.store.load(conversation_id).await? else {
            return Ok(MemoOutcome::NotFound);
        };
        if !latest.commit_memo_section(section, covered.clone(), self.clock.now()) {
            tracing::info!(
                conversation_id,
                cursor = latest.memo_cursor,
                expected = covered.start,
                "memo cursor moved during synthesis, discarding section"
            );
            return Ok(MemoOutcome::Superseded);
        }
        self.store.save(&latest).await?;
        tracing::info!(
            conversation_id,
            from_turn = covered.start,
            to_turn = covered.end,
            "memo section appended"
        );
        Ok(MemoOutcome::Appended {
            cursor: covered.end,
        })
    }
}

/// Handle for submitting conversations to the memo timer service
#[derive(Clone)]
pub struct MemoScheduler {
    sender: mpsc::UnboundedSender<String>,
}

impl MemoScheduler {
    /// Starts the timer loop; it stops once every handle is dropped.
    pub fn start(writer: Arc<MemoWriter>, window: Duration) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_timers(writer, window, receiver));
        (Self { sender }, handle)
    }

    /// Arms (or re-arms) the inactivity timer for `conversation_id`.
    pub fn schedule(&self, conversation_id: &str) {
        if self.sender.send(conversation_id.to_string()).is_err() {
            tracing::warn!(conversation_id, "memo scheduler has stopped, dropping request");
        }
    }
}

async fn run_timers(
    writer: Arc<MemoWriter>,
    window: Duration,
    mut receiver: mpsc::UnboundedReceiver<String>,
) {
    let mut timers: DelayQueue<String> = DelayQueue::new();
    let mut pending: HashMap<String, Key> = HashMap::new();

    loop {
        tokio::select! {
            submitted = receiver.recv() => {
                let Some(conversation_id) = submitted else {
                    tracing::debug!(pending = pending.len(), "memo scheduler shutting down");
                    break;
                };
                match pending.get(&conversation_id) {
                    Some(key) => timers.reset(key, window),
                    None => {
                        let key = timers.insert(conversation_id.clone(), window);
                        pending.insert(conversation_id, key);
                    }
                }
            }
            Some(expired) = timers.next() => {
                let conversation_id = expired.into_inner();
                pending.remove(&conversation_id);
                let writer = writer.clone();
                tokio::spawn(async move {
                    match writer.check_and_summarize(&conversation_id).await {
                        Ok(outcome) => {
                            tracing::debug!(conversation_id, ?outcome, "memo check finished");
                        }
                        Err(error) => {
                            tracing::warn!(conversation_id, %error, "memo check failed");
                        }
                    }
                });
            }
        }
    }
}
