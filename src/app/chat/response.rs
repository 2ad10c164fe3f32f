use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::agents::{GenerationRequest, TextGenerator};
use crate::app::types::Conversation;
use crate::clock::Clock;
use crate::error::CollaboratorError;
use crate::services::identity::extract_display_name;
use crate::storage::ConversationStore;

/// What the caller sees of one turn, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Fragment(String),
    Completed { reply: String },
    /// Ends the turn after any fragments already delivered
    Failed(String),
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("generation failed: {0}")]
    Generation(#[from] CollaboratorError),
    #[error("could not save conversation: {0}")]
    Storage(String),
    #[error("client went away mid-stream")]
    ClientGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Completed,
    Aborted,
}

/// Forwards generation fragments to the caller while accumulating the reply
pub struct StreamingSession<'a> {
    generator: &'a dyn TextGenerator,
    events: &'a mpsc::Sender<SessionEvent>,
    idle_timeout: Duration,
    state: SessionState,
    reply: String,
}

impl<'a> StreamingSession<'a> {
    /// `idle_timeout` bounds the wait for each fragment, not the whole reply.
    pub fn new(
        generator: &'a dyn TextGenerator,
        events: &'a mpsc::Sender<SessionEvent>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            events,
            idle_timeout,
            state: SessionState::Idle,
            reply: String::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Text delivered so far
    #[must_use]
    pub fn partial_reply(&self) -> &str {
        &self.reply
    }

    /// Streams one reply. Returns the full text once the collaborator ends the
    /// stream; every fragment has been forwarded by then.
    pub async fn run(&mut self, request: &GenerationRequest) -> Result<String, TurnError> {
        self.state = SessionState::Streaming;
        let mut fragments = match self.generator.stream(request).await {
            Ok(fragments) => fragments,
            Err(error) => return Err(self.abort(error.into())),
        };

        loop {
            let item = match tokio::time::timeout(self.idle_timeout, fragments.next()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => Err(CollaboratorError::timeout("generation stream", self.idle_timeout)),
            };
            match item {
                Ok(fragment) if fragment.is_empty() => {}
                Ok(fragment) => {
                    self.reply.push_str(&fragment);
                    if self.events.send(SessionEvent::Fragment(fragment)).await.is_err() {
                        return Err(self.abort(TurnError::ClientGone));
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        %error,
                        delivered_chars = self.reply.chars().count(),
                        "generation stream broke"
                    );
                    return Err(self.abort(error.into()));
                }
            }
        }

        self.state = SessionState::Completed;
        Ok(std::mem::take(&mut self.reply))
    }

    fn abort(&mut self, error: TurnError) -> TurnError {
        self.state = SessionState::Aborted;
        error
    }
}

/// Appends the exchange, learns the display name if still unknown, and saves.
///
/// Returns `Ok(false)` without touching the store when the reply is blank.
pub async fn commit_exchange(
    store: &dyn ConversationStore,
    clock: &dyn Clock,
    conversation: &mut Conversation,
    user_text: &str,
    reply: &str,
) -> Result<bool, TurnError> {
    if reply.trim().is_empty() {
        tracing::warn!(
            conversation_id = %conversation.id,
            "generation produced an empty reply, not saving the turn"
        );
        return Ok(false);
    }

    conversation.append_exchange(user_text, reply, clock.now());
    if conversation.display_name.is_none()
        && let Some(name) = extract_display_name(&conversation.turns)
    {
        tracing::info!(conversation_id = %conversation.id, name, "learned display name");
        conversation.display_name = Some(name);
    }

    store
        .save(conversation)
        .await
        .map_err(|error| TurnError::Storage(error.to_string()))?;
    Ok(true)
}
