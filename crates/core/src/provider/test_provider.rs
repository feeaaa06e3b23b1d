//! A scripted LLM provider for unit testing purposes.
use crate::completion::{ChatMessage, CompletionModel, CompletionSettings, ProviderError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Mutex;

/// What the scripted stream does after its chunks are emitted.
#[derive(Debug, Clone, PartialEq)]
enum StreamEnd {
    Close,
    /// Never yields again, like a provider that stalls mid-response.
    Hang,
    /// Yields a read error, like a connection dropped mid-response.
    Fail(String),
}

/// A `CompletionModel` that replays fixed chunks.
///
/// - `new(chunks)`: streams the chunks then closes; `complete` returns them joined.
/// - `hang_after_chunks()`: streams the chunks then never yields again.
/// - `fail_after_chunks(msg)`: streams the chunks then yields a stream error.
/// - `rejecting(msg)`: fails both calls before any token.
///
/// Every request's message history is recorded for inspection.
#[derive(Debug)]
pub struct TestProviderModel {
    chunks: Vec<String>,
    end: StreamEnd,
    reject: Option<String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl TestProviderModel {
    pub fn new<S: Into<String>>(chunks: impl IntoIterator<Item = S>) -> Self {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            end: StreamEnd::Close,
            reject: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            reject: Some(message.into()),
            ..Self::new(Vec::<String>::new())
        }
    }

    pub fn hang_after_chunks(mut self) -> Self {
        self.end = StreamEnd::Hang;
        self
    }

    pub fn fail_after_chunks(mut self, message: impl Into<String>) -> Self {
        self.end = StreamEnd::Fail(message.into());
        self
    }

    /// Message histories received so far, one entry per request.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, messages: &[ChatMessage]) -> Result<(), ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(messages.to_vec());
        match &self.reject {
            Some(message) => Err(ProviderError::Request(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CompletionModel for TestProviderModel {
    fn name(&self) -> &str {
        "test-model"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _settings: &CompletionSettings,
    ) -> Result<String, ProviderError> {
        self.record(messages)?;
        Ok(self.chunks.concat())
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        _settings: &CompletionSettings,
    ) -> Result<BoxStream<'static, Result<String, ProviderError>>, ProviderError> {
        self.record(messages)?;
        let chunks = self.chunks.clone();
        let end = self.end.clone();

        let stream = async_stream::stream! {
            for chunk in chunks {
                yield Ok(chunk);
            }
            match end {
                StreamEnd::Close => {}
                StreamEnd::Hang => futures::future::pending::<()>().await,
                StreamEnd::Fail(message) => yield Err(ProviderError::Stream(message)),
            }
        };
        Ok(Box::pin(stream))
    }
}
