use crate::completion::{
    ChatMessage, CompletionModel, CompletionSettings, ProviderError, RequestContext,
};
use crate::conversation::{Conversation, ConversationError};
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Capacity of the token conduit.
const TOKEN_BUFFER: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Request cancelled or timed out")]
    Cancelled,
    #[error(transparent)]
    Conversation(#[from] ConversationError),
}

impl ChatError {
    fn from_provider(error: ProviderError) -> Self {
        match error {
            ProviderError::Request(message) => ChatError::RequestFailed(message),
            other => ChatError::RequestFailed(other.to_string()),
        }
    }
}

/// Sends a conversation to a model and records the reply.
#[derive(Clone)]
pub struct ChatClient {
    model: Arc<dyn CompletionModel>,
    temperature: f32,
}

impl ChatClient {
    pub fn new(model: Arc<dyn CompletionModel>, temperature: f32) -> Self {
        Self {
            model,
            temperature: temperature.clamp(0.0, 1.0),
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Appends `prompt`, waits for the whole reply and appends it.
    ///
    /// On failure the user message stays in the history without a reply.
    #[instrument(skip_all, fields(id = %conversation.id()))]
    pub async fn send_completion_request(
        &self,
        ctx: &RequestContext,
        conversation: &Conversation,
        prompt: &str,
    ) -> Result<String, ChatError> {
        conversation.append(ChatMessage::user(prompt))?;

        let settings = CompletionSettings {
            temperature: self.temperature,
            max_tokens: None,
        };
        let messages = conversation.messages();
        let response = tokio::select! {
            biased;
            _ = ctx.done() => return Err(ChatError::Cancelled),
            response = self.model.complete(&messages, &settings) => response,
        }
        .map_err(ChatError::from_provider)?;

        conversation.append(ChatMessage::assistant(response.clone()))?;
        Ok(response)
    }

    /// Streams a reply to `prompt` into `tx`.
    ///
    /// Errors raised before the first token go to `err_tx`; a read error
    /// mid-stream ends the stream like a normal close. Unless the request was
    /// rejected, whatever was delivered on `tx` is appended as one assistant
    /// message, even when empty. Both conduits close when this returns.
    #[instrument(skip_all, fields(id = %conversation.id()))]
    pub async fn send_stream_request(
        &self,
        ctx: RequestContext,
        conversation: Arc<Conversation>,
        prompt: String,
        tx: mpsc::Sender<String>,
        err_tx: mpsc::Sender<ChatError>,
    ) {
        if let Err(e) = conversation.append(ChatMessage::user(prompt)) {
            report(&err_tx, e.into());
            return;
        }

        let settings = CompletionSettings {
            temperature: self.temperature,
            max_tokens: Some(conversation.max_tokens()),
        };
        let messages = conversation.messages();
        let mut buffer = String::new();
        let opened = tokio::select! {
            biased;
            _ = ctx.done() => {
                debug!("Context done before the stream opened");
                None
            }
            opened = self.model.complete_stream(&messages, &settings) => Some(opened),
        };
        let mut stream = match opened {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                report(&err_tx, ChatError::from_provider(e));
                return;
            }
            None => {
                self.record_reply(&conversation, buffer, &err_tx);
                return;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.done() => {
                    debug!("Context done, stopping stream");
                    break;
                }
                next = stream.next() => next,
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!("Stream ended early: {e}");
                    break;
                }
                None => break,
            };

            let sent = tokio::select! {
                biased;
                _ = ctx.done() => false,
                sent = tx.send(chunk.clone()) => sent.is_ok(),
            };
            if !sent {
                debug!("Token conduit closed or context done");
                break;
            }
            buffer.push_str(&chunk);
        }
        drop(stream);
        self.record_reply(&conversation, buffer, &err_tx);
    }

    /// Appends the streamed reply, empty or partial, as one assistant message.
    fn record_reply(
        &self,
        conversation: &Conversation,
        reply: String,
        err_tx: &mpsc::Sender<ChatError>,
    ) {
        debug!(len = reply.len(), "Recording assistant message");
        if let Err(e) = conversation.append(ChatMessage::assistant(reply)) {
            report(err_tx, e.into());
        }
    }

    /// Creates both conduits and runs [`ChatClient::send_stream_request`] on
    /// its own task.
    pub fn spawn_stream_request(
        &self,
        ctx: RequestContext,
        conversation: Arc<Conversation>,
        prompt: impl Into<String>,
    ) -> (
        mpsc::Receiver<String>,
        mpsc::Receiver<ChatError>,
        JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(TOKEN_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(1);
        let client = self.clone();
        let prompt = prompt.into();
        let handle = tokio::spawn(async move {
            client
                .send_stream_request(ctx, conversation, prompt, tx, err_tx)
                .await
        });
        (rx, err_rx, handle)
    }
}

/// At most one error is sent per request, so this never waits.
fn report(err_tx: &mpsc::Sender<ChatError>, error: ChatError) {
    debug!("Reporting {error}");
    if let Err(e) = err_tx.try_send(error) {
        warn!("Dropped chat error: {e}");
    }
}
