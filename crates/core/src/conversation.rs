//! A conversation is the ordered, capped message history sent to the model on
//! every request. The first message is always the system prompt.
use crate::completion::{ChatMessage, SenderType};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_MESSAGES: usize = 100;
pub const DEFAULT_MAX_TOKENS: u32 = 1600;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error("Conversation is at max length of {max} messages")]
    Full { max: usize },
}

/// A bounded, thread-safe message log.
///
/// Appends take a short lock for the length check and the push; no I/O
/// happens while the lock is held.
#[derive(Debug)]
pub struct Conversation {
    id: Uuid,
    messages: Mutex<Vec<ChatMessage>>,
    max_messages: usize,
    max_tokens: u32,
}

impl Conversation {
    /// Starts a conversation seeded with `system_prompt`. Zero limits fall back
    /// to the defaults.
    pub fn new(system_prompt: &str, max_messages: usize, max_tokens: u32) -> Self {
        let max_messages = if max_messages == 0 {
            DEFAULT_MAX_MESSAGES
        } else {
            max_messages
        };
        let max_tokens = if max_tokens == 0 {
            DEFAULT_MAX_TOKENS
        } else {
            max_tokens
        };
        let id = Uuid::new_v4();
        debug!(%id, max_messages, max_tokens, "New conversation");

        Self {
            id,
            messages: Mutex::new(vec![ChatMessage::system(system_prompt)]),
            max_messages,
            max_tokens,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ChatMessage>> {
        // A panic while holding the lock cannot leave the vector half-pushed.
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a message, failing without side effects once the cap is reached.
    pub fn append(&self, message: ChatMessage) -> Result<(), ConversationError> {
        let mut messages = self.lock();
        if messages.len() >= self.max_messages {
            return Err(ConversationError::Full {
                max: self.max_messages,
            });
        }
        messages.push(message);
        Ok(())
    }

    /// Seeds example prompt/response pairs as user then assistant messages.
    ///
    /// Stops quietly at the cap and returns the number of messages appended.
    #[instrument(skip(self, pairs), fields(id = %self.id))]
    pub fn seed<I, P, R>(&self, pairs: I) -> usize
    where
        I: IntoIterator<Item = (P, R)>,
        P: AsRef<str>,
        R: AsRef<str>,
    {
        let mut added = 0;
        for (prompt, response) in pairs {
            if let Err(e) = self.append(ChatMessage::user(prompt.as_ref())) {
                warn!("Stopped seeding: {e}");
                break;
            }
            added += 1;
            if let Err(e) = self.append(ChatMessage::assistant(response.as_ref())) {
                warn!("Stopped seeding: {e}");
                break;
            }
            added += 1;
        }
        added
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the history in chronological order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().clone()
    }

    pub fn last_assistant_message(&self) -> Option<ChatMessage> {
        self.lock()
            .iter()
            .rev()
            .find(|m| m.sender == SenderType::Assistant)
            .cloned()
    }
}
