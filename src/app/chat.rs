pub mod agent;
pub mod memo;
pub mod response;
pub mod summary;

use tokio::sync::mpsc;

use crate::app::types::Conversation;
use crate::app::{ChatEngine, TurnRequest, new_conversation_id};

use self::agent::TurnPrompt;
use self::response::{SessionEvent, StreamingSession, TurnError, commit_exchange};

const EVENT_BUFFER: usize = 64;

impl ChatEngine {
    /// Starts one turn in the background.
    ///
    /// Returns the conversation id and the event stream for the reply. The
    /// stream carries fragments as they arrive and ends with exactly one
    /// `Completed` or `Failed`, unless the receiver is dropped first.
    ///
    /// Waits for the conversation's previous turn to finish before returning,
    /// so turns on one conversation commit in submission order.
    pub async fn submit_turn(&self, request: TurnRequest) -> (String, mpsc::Receiver<SessionEvent>) {
        let conversation_id = request
            .conversation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| new_conversation_id(self.clock.now()));
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        let guard = self.locks.acquire(&conversation_id).await;

        let engine = self.clone();
        let id = conversation_id.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let outcome = engine
                .run_turn(&id, &request.text, request.display_name, &sender)
                .await;
            let last_event = match outcome {
                Ok(reply) => SessionEvent::Completed { reply },
                Err(TurnError::ClientGone) => {
                    tracing::info!(conversation_id = %id, "client left mid-reply, turn dropped");
                    return;
                }
                Err(error) => {
                    tracing::warn!(conversation_id = %id, %error, "turn failed");
                    SessionEvent::Failed(error.to_string())
                }
            };
            if sender.send(last_event).await.is_err() {
                tracing::debug!(conversation_id = %id, "client left before the final event");
            }
        });

        (conversation_id, receiver)
    }

    async fn run_turn(
        &self,
        conversation_id: &str,
        text: &str,
        display_name: Option<String>,
        events: &mpsc::Sender<SessionEvent>,
    ) -> Result<String, TurnError> {
        let mut conversation = self
            .store
            .load(conversation_id)
            .await
            .map_err(|error| TurnError::Storage(error.to_string()))?
            .unwrap_or_else(|| {
                tracing::info!(conversation_id, "starting new conversation");
                Conversation::new(conversation_id, self.clock.now())
            });
        if conversation.display_name.is_none() {
            conversation.display_name = display_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty());
        }

        let directive = self.pipeline.plan_turn(text, &conversation.turns).await;
        let request = TurnPrompt {
            persona: &self.config.persona,
            locale: self.config.locale,
            display_name: conversation.display_name.as_deref(),
            directive: &directive,
            history: &conversation.turns,
            turn_text: text,
        }
        .into_request();

        let mut session = StreamingSession::new(
            self.generator.as_ref(),
            events,
            self.config.generation.stream_idle_timeout(),
        );
        let reply = match session.run(&request).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::debug!(
                    conversation_id,
                    state = ?session.state(),
                    partial_chars = session.partial_reply().chars().count(),
                    "session ended without a reply"
                );
                return Err(error);
            }
        };

        if commit_exchange(
            self.store.as_ref(),
            self.clock.as_ref(),
            &mut conversation,
            text,
            &reply,
        )
        .await?
        {
            self.scheduler.schedule(conversation_id);
        }
        Ok(reply)
    }
}
