use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::groq_client::{ClientError, ModelClient};

/// The models a session can be switched between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModelId {
    #[default]
    Small,
    Large,
    Mixture,
    Lite,
}

impl ModelId {
    pub const ALL: [ModelId; 4] = [ModelId::Small, ModelId::Large, ModelId::Mixture, ModelId::Lite];

    /// Identifier sent to the API.
    pub fn api_name(self) -> &'static str {
        match self {
            ModelId::Small => "llama3-8b-8192",
            ModelId::Large => "llama3-70b-8192",
            ModelId::Mixture => "mixtral-8x7b-32768",
            ModelId::Lite => "gemma-7b-it",
        }
    }

    pub fn alias(self) -> &'static str {
        match self {
            ModelId::Small => "model-small",
            ModelId::Large => "model-large",
            ModelId::Mixture => "model-mixture",
            ModelId::Lite => "model-lite",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ModelId::Small => "Llama 3 8B, 8k context",
            ModelId::Large => "Llama 3 70B, 8k context",
            ModelId::Mixture => "Mixtral 8x7B, 32k context",
            ModelId::Lite => "Gemma 7B instruct",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown model '{0}'. Type /models to list the supported models")]
pub struct UnknownModel(pub String);

impl FromStr for ModelId {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        ModelId::ALL
            .into_iter()
            .find(|model| {
                model.alias().eq_ignore_ascii_case(name) || model.api_name().eq_ignore_ascii_case(name)
            })
            .ok_or_else(|| UnknownModel(name.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// How much of the prior history is replayed to the model on each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextWindow {
    /// Replay every prior turn.
    #[default]
    Full,
    /// Replay only the most recent `n` prior turns.
    Recent(usize),
}

impl ContextWindow {
    pub fn apply(self, turns: &[Turn]) -> &[Turn] {
        match self {
            ContextWindow::Full => turns,
            ContextWindow::Recent(n) => &turns[turns.len().saturating_sub(n)..],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitingReply { epoch: u64 },
}

/// A reply request that has been started but not yet resolved.
///
/// Produced by [`ConversationState::begin_reply`] and handed back to
/// [`ConversationState::complete_reply`] together with the client's result.
#[derive(Debug)]
pub struct PendingReply {
    model: ModelId,
    epoch: u64,
    context: Vec<Turn>,
    text: String,
}

impl PendingReply {
    pub fn model(&self) -> ModelId {
        self.model
    }

    /// Prior turns to send as context, oldest first.
    pub fn context(&self) -> &[Turn] {
        &self.context
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Conversation history for one chat session.
///
/// The history only ever holds turns produced under `active_model`: switching
/// to another model wipes it.
#[derive(Debug)]
pub struct ConversationState {
    active_model: ModelId,
    history: Vec<Turn>,
    phase: Phase,
    // Bumped on every reset so replies started before it can be recognised.
    epoch: u64,
    context_window: ContextWindow,
}

impl ConversationState {
    pub fn new(model: ModelId) -> Self {
        Self {
            active_model: model,
            history: Vec::new(),
            phase: Phase::Idle,
            epoch: 0,
            context_window: ContextWindow::Full,
        }
    }

    pub fn with_context_window(mut self, context_window: ContextWindow) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn active_model(&self) -> ModelId {
        self.active_model
    }

    pub fn context_window(&self) -> ContextWindow {
        self.context_window
    }

    pub fn is_awaiting_reply(&self) -> bool {
        matches!(self.phase, Phase::AwaitingReply { .. })
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Switch to `model`, clearing the history if it differs from the
    /// current one. Returns `true` when a reset happened.
    ///
    /// A reply still pending at that point is invalidated and will be
    /// discarded when it arrives.
    pub fn select_model(&mut self, model: ModelId) -> bool {
        if model == self.active_model {
            debug!("Model {} already active, keeping {} turns", model, self.history.len());
            return false;
        }

        info!(
            "Switching model from {} to {}, dropping {} turns",
            self.active_model,
            model,
            self.history.len()
        );
        self.active_model = model;
        self.reset();
        true
    }

    /// Drop the whole history without changing the model.
    pub fn clear(&mut self) {
        info!("Clearing {} turns", self.history.len());
        self.reset();
    }

    fn reset(&mut self) {
        self.history.clear();
        self.epoch += 1;
        if self.is_awaiting_reply() {
            warn!("Session reset while a reply was pending; the reply will be discarded");
            self.phase = Phase::Idle;
        }
    }

    pub fn append_user_turn(&mut self, text: &str) -> Result<(), ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }
        self.history.push(Turn::user(text));
        Ok(())
    }

    /// Record the user's message and mark the session as waiting for a reply.
    pub fn begin_reply(&mut self, text: &str) -> Result<PendingReply, ChatError> {
        if self.is_awaiting_reply() {
            return Err(ChatError::SessionBusy);
        }

        let context = self.context_window.apply(&self.history).to_vec();
        self.append_user_turn(text)?;
        self.phase = Phase::AwaitingReply { epoch: self.epoch };
        debug!(
            "Awaiting reply from {} with {} context turns",
            self.active_model,
            context.len()
        );

        Ok(PendingReply {
            model: self.active_model,
            epoch: self.epoch,
            context,
            text: text.to_string(),
        })
    }

    /// Resolve a pending reply. On success the assistant turn is appended;
    /// on failure the history is left holding only the user turn.
    pub fn complete_reply(
        &mut self,
        pending: PendingReply,
        result: Result<String, ClientError>,
    ) -> Result<String, ChatError> {
        match self.phase {
            Phase::AwaitingReply { epoch } if epoch == pending.epoch => {}
            _ => {
                warn!("Discarding reply from {}: session was reset", pending.model);
                return Err(ChatError::StaleReply);
            }
        }
        self.phase = Phase::Idle;

        match result {
            Ok(reply) => {
                debug!("Received reply of {} bytes from {}", reply.len(), pending.model);
                self.history.push(Turn::assistant(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                warn!("Reply from {} failed: {}", pending.model, e);
                Err(ChatError::ModelUnavailable {
                    detail: e.to_string(),
                })
            }
        }
    }

    /// Append `text` as a user turn, ask `client` for a reply with the prior
    /// history as context, and append the reply.
    pub async fn request_reply(
        &mut self,
        client: &dyn ModelClient,
        text: &str,
    ) -> Result<String, ChatError> {
        let pending = self.begin_reply(text)?;

        let result = {
            let in_flight = InFlight {
                phase: &mut self.phase,
                settled: false,
            };
            let result = client
                .generate(pending.model(), pending.context(), pending.text())
                .await;
            in_flight.settle();
            result
        };

        self.complete_reply(pending, result)
    }

    pub fn render_snapshot(&self) -> &[Turn] {
        &self.history
    }
}

/// Puts the session back to idle if a `request_reply` future is dropped
/// before the client answers. The history is left untouched.
struct InFlight<'a> {
    phase: &'a mut Phase,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!("Reply request abandoned");
            *self.phase = Phase::Idle;
        }
    }
}
