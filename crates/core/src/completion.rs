use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Stream error: {0}")]
    Stream(String),
}

/// Deadline and cancellation scope for a request.
///
/// A child context is cancelled with its parent, so cancelling a session
/// also ends the turn running inside it. Cancelling a child leaves the
/// parent untouched.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl RequestContext {
    /// A context with no deadline that is only done when cancelled.
    pub fn background() -> Self {
        Self {
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().child_with_timeout(timeout)
    }

    /// Derives a context that ends at the earlier of the parent's deadline and
    /// `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < own => parent,
            _ => own,
        };
        Self {
            deadline: Some(deadline),
            token: self.token.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and any context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the deadline passes or the context is cancelled.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = self.token.cancelled() => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    System,
    Assistant,
    User,
}

impl From<SenderType> for String {
    fn from(val: SenderType) -> Self {
        val.as_str().into()
    }
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match &self {
            SenderType::System => "system",
            SenderType::User => "user",
            SenderType::Assistant => "assistant",
        }
    }
}

/// A typed fragment of a fetched resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MessagePart {
    /// Where the content came from, e.g. `URL: https://..`.
    Source { label: String, locator: String },
    Status(String),
    Body(String),
}

impl MessagePart {
    pub fn to_text(&self) -> String {
        match self {
            MessagePart::Source { label, locator } => format!("{label}: {locator}"),
            MessagePart::Status(status) => format!("Status: {status}"),
            MessagePart::Body(body) => format!("Content: {body}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub sender: SenderType,
    pub text: String,
    /// Optional participant name, set to the locator for resource messages.
    pub name: Option<String>,
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    pub fn new(sender: SenderType, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            name: None,
            parts: Vec::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(SenderType::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(SenderType::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(SenderType::Assistant, text)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_parts(mut self, parts: Vec<MessagePart>) -> Self {
        self.parts = parts;
        self
    }

    /// Builds a message whose text mirrors its structured parts.
    pub fn from_parts(sender: SenderType, parts: Vec<MessagePart>) -> Self {
        let text = parts
            .iter()
            .map(MessagePart::to_text)
            .collect::<Vec<_>>()
            .join("\n");
        Self::new(sender, text).with_parts(parts)
    }

    /// Flattened text content. Structured parts win over `text` when present.
    pub fn content(&self) -> String {
        if self.parts.is_empty() {
            self.text.clone()
        } else {
            self.parts
                .iter()
                .map(MessagePart::to_text)
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

/// Per-request generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: None,
        }
    }
}

/// A remote chat-completion endpoint.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Blocks until the full response is available.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        settings: &CompletionSettings,
    ) -> Result<String, ProviderError>;

    /// Opens a streaming completion. Errors returned here happen before any
    /// token is produced; errors inside the stream are read failures.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        settings: &CompletionSettings,
    ) -> Result<BoxStream<'static, Result<String, ProviderError>>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_done_resolves_after_cancel() {
        let ctx = RequestContext::background();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.done().await });
        assert!(!ctx.is_done());
        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn test_child_context_deadline_is_capped_by_parent() {
        let session = RequestContext::with_timeout(Duration::from_secs(5));
        let turn = session.child_with_timeout(Duration::from_secs(60));
        assert_eq!(turn.deadline(), session.deadline());

        let short = session.child_with_timeout(Duration::from_secs(1));
        assert!(short.deadline().unwrap() < session.deadline().unwrap());
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_child() {
        let session = RequestContext::background();
        let turn = session.child_with_timeout(Duration::from_secs(60));
        assert!(!turn.is_done());

        session.cancel();
        assert!(turn.is_done());
        tokio::time::timeout(Duration::from_secs(1), turn.done())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_running() {
        let session = RequestContext::background();
        let turn = session.child_with_timeout(Duration::from_secs(60));
        turn.cancel();
        assert!(turn.is_done());
        assert!(!session.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_fires_at_deadline() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(50));
        assert!(!ctx.is_done());
        ctx.done().await;
        assert!(ctx.is_done());
    }

    #[test]
    fn test_message_content_prefers_parts() {
        let plain = ChatMessage::user("hi");
        assert_eq!(plain.content(), "hi");

        let resource = ChatMessage::system("").with_parts(vec![
            MessagePart::Source {
                label: "URL".to_string(),
                locator: "http://x/y".to_string(),
            },
            MessagePart::Status("200 OK".to_string()),
            MessagePart::Body("body".to_string()),
        ]);
        assert_eq!(
            resource.content(),
            "URL: http://x/y\nStatus: 200 OK\nContent: body"
        );
    }
}
