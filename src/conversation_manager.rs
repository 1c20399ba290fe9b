//! Per-user conversation state and history.
//!
//! Each conversation is either [`ConversationState::Idle`] or
//! [`ConversationState::ActiveChat`]. Inbound [`Event`]s are resolved against
//! a pure transition table ([`transition`]) and the resulting [`Action`] is
//! executed by [`ConversationManager::handle`], which owns every session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::completion::{or_fallback, CompletionGateway};
use crate::error::CompletionError;
use crate::history::{MessageEntry, MessageHistory};

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that provides useful information to the user. \
    Your name is Claudia. You are friendly and cheerful. You use The International System of Units.";

pub const WELCOME_TEXT: &str = "Hi! I am your Personal AI assistant. How can I assist you today?";
pub const START_CHAT_TEXT: &str = "You can start chatting now! Just type your message.";
pub const HELP_TEXT: &str = "Press **Start Chat** and then type any message; I will answer using the \
    conversation so far as context. Send `/start` at any time to begin a fresh conversation.";

pub const START_CHAT_ID: &str = "start_chat";
pub const HELP_ID: &str = "help";

/// Platform-assigned identifier of the end user owning a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationId(pub u64);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConversationState {
    #[default]
    Idle,
    ActiveChat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The start command. Restarts the conversation.
    Welcome,
    StartChat,
    Help,
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Restart,
    AcknowledgeStart,
    ShowHelp,
    Complete(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ConversationState,
    pub action: Action,
}

/// The state machine. `None` means the event has no handler in `state` and
/// must be ignored.
pub fn transition(state: ConversationState, event: &Event) -> Option<Transition> {
    use ConversationState::{ActiveChat, Idle};

    let (next, action) = match (state, event) {
        (_, Event::Welcome) => (Idle, Action::Restart),
        (_, Event::StartChat) => (ActiveChat, Action::AcknowledgeStart),
        (current, Event::Help) => (current, Action::ShowHelp),
        (ActiveChat, Event::Text(text)) => (ActiveChat, Action::Complete(text.clone())),
        (Idle, Event::Text(_)) => return None,
    };

    Some(Transition { next, action })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuButton {
    pub label: String,
    pub custom_id: String,
}

/// Outbound message produced by handling an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Menu {
        text: String,
        buttons: Vec<MenuButton>,
    },
}

impl Reply {
    fn welcome_menu() -> Self {
        Reply::Menu {
            text: WELCOME_TEXT.to_string(),
            buttons: vec![
                MenuButton {
                    label: "Start Chat".to_string(),
                    custom_id: START_CHAT_ID.to_string(),
                },
                MenuButton {
                    label: "Help".to_string(),
                    custom_id: HELP_ID.to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    state: ConversationState,
    history: MessageHistory,
}

type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

pub struct ConversationManager {
    sessions: Mutex<HashMap<ConversationId, SessionHandle>>,
    gateway: Arc<dyn CompletionGateway>,
    history_length: usize,
}

impl ConversationManager {
    pub fn new(gateway: Arc<dyn CompletionGateway>, history_length: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            gateway,
            history_length,
        }
    }

    /// Handles one event for one conversation and returns what should be sent
    /// back. Events for the same conversation are processed one at a time.
    ///
    /// A failed completion leaves the session untouched and is returned to the
    /// caller.
    pub async fn handle(
        &self,
        id: ConversationId,
        event: Event,
    ) -> Result<Vec<Reply>, CompletionError> {
        let handle = self.session(id);
        let mut session = handle.lock().await;

        let Some(Transition { next, action }) = transition(session.state, &event) else {
            tracing::debug!(conversation = %id, state = ?session.state, ?event, "no handler for event, ignoring");
            return Ok(Vec::new());
        };

        let replies = match action {
            Action::Restart => {
                session.history.clear();
                vec![Reply::welcome_menu()]
            }
            Action::AcknowledgeStart => vec![Reply::Text(START_CHAT_TEXT.to_string())],
            Action::ShowHelp => vec![Reply::Text(HELP_TEXT.to_string())],
            Action::Complete(text) => {
                let reply = self.complete(&mut session.history, text).await?;
                vec![Reply::Text(reply)]
            }
        };

        if session.state != next {
            tracing::info!(conversation = %id, from = ?session.state, to = ?next, "conversation state changed");
        }
        session.state = next;

        Ok(replies)
    }

    async fn complete(
        &self,
        history: &mut MessageHistory,
        text: String,
    ) -> Result<String, CompletionError> {
        let mut pending = history.clone();
        if pending.is_empty() {
            pending.append(MessageEntry::system(SYSTEM_PROMPT));
        }
        pending.append(MessageEntry::user(text));

        let window = pending.recent(self.history_length);
        tracing::debug!(stored = pending.len(), sent = window.len(), "history window prepared");
        let reply = or_fallback(self.gateway.generate_reply(&window).await?);

        pending.append(MessageEntry::assistant(reply.clone()));
        *history = pending;

        Ok(reply)
    }

    pub async fn state(&self, id: ConversationId) -> ConversationState {
        match self.existing(id) {
            Some(handle) => handle.lock().await.state,
            None => ConversationState::default(),
        }
    }

    #[cfg(test)]
    pub async fn history(&self, id: ConversationId) -> Vec<MessageEntry> {
        match self.existing(id) {
            Some(handle) => handle.lock().await.history.entries().to_vec(),
            None => Vec::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn session(&self, id: ConversationId) -> SessionHandle {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.entry(id).or_default().clone()
    }

    fn existing(&self, id: ConversationId) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&id).cloned()
    }
}
