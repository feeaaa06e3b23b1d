use super::openai_types::{ChatCompletionResponse, ChatCompletionStreamResponse};
use crate::completion::{ChatMessage, CompletionModel, CompletionSettings, ProviderError};
use crate::model::ModelConfig;
use async_openai::Client as OpenAIClient;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Value, json};
use tracing::{debug, instrument};

/// Chat model served over an OpenAI-compatible HTTP API.
pub struct OpenAIBaseModel {
    config: ModelConfig,
    client: OpenAIClient<OpenAIConfig>,
}

impl OpenAIBaseModel {
    pub fn new(model_config: ModelConfig) -> Result<Self, ProviderError> {
        if model_config.api_key.is_empty() {
            return Err(ProviderError::Configuration(format!(
                "Missing API key for {}",
                model_config.provider.as_str()
            )));
        }

        let config = OpenAIConfig::new()
            .with_api_key(model_config.api_key.clone())
            .with_api_base(model_config.base_url.clone());
        let client = OpenAIClient::with_config(config);

        Ok(Self {
            config: model_config,
            client,
        })
    }

    fn to_openai_message(msg: &ChatMessage) -> Value {
        let content = if msg.parts.is_empty() {
            json!(msg.text)
        } else {
            msg.parts
                .iter()
                .map(|part| json!({"type": "text", "text": part.to_text()}))
                .collect()
        };

        let mut message = json!({
            "role": msg.sender.as_str(),
            "content": content,
        });
        if let Some(name) = msg.name.as_deref().map(participant_name)
            && !name.is_empty()
        {
            message["name"] = json!(name);
        }
        message
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        settings: &CompletionSettings,
        stream: bool,
    ) -> Value {
        let messages: Vec<Value> = messages.iter().map(Self::to_openai_message).collect();
        let mut request = json!({
            "model": self.config.name,
            "messages": messages,
            "temperature": settings.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = settings.max_tokens {
            request["max_tokens"] = json!(max_tokens);
        }
        request
    }
}

/// Participant names may only contain `[a-zA-Z0-9_-]`, at most 64 chars.
fn participant_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}

#[async_trait]
impl CompletionModel for OpenAIBaseModel {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(skip_all, fields(model = %self.config.name))]
    async fn complete(
        &self,
        messages: &[ChatMessage],
        settings: &CompletionSettings,
    ) -> Result<String, ProviderError> {
        let request = self.build_request(messages, settings, false);
        let response: ChatCompletionResponse = self
            .client
            .chat()
            .create_byot(request)
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if let Some(usage) = &response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completion usage"
            );
        }

        // With several choices the last one wins.
        let choice = response.choices.into_iter().last();
        if let Some(reason) = choice.as_ref().and_then(|c| c.finish_reason) {
            debug!(?reason, "Completion finished");
        }
        Ok(choice.and_then(|c| c.message.content).unwrap_or_default())
    }

    #[instrument(skip_all, fields(model = %self.config.name))]
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        settings: &CompletionSettings,
    ) -> Result<BoxStream<'static, Result<String, ProviderError>>, ProviderError> {
        let request = self.build_request(messages, settings, true);
        let response: BoxStream<'static, Result<ChatCompletionStreamResponse, OpenAIError>> = self
            .client
            .chat()
            .create_stream_byot(request)
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let mut tokens = response
            .filter_map(|chunk| async move {
                match chunk {
                    Ok(chunk) => {
                        if let Some(usage) = &chunk.usage {
                            debug!(
                                prompt_tokens = usage.prompt_tokens,
                                completion_tokens = usage.completion_tokens,
                                "Stream usage"
                            );
                        }
                        let text: String = chunk
                            .choices
                            .into_iter()
                            .filter_map(|choice| {
                                if let Some(reason) = choice.finish_reason {
                                    debug!(?reason, "Stream finished");
                                }
                                choice.delta.content
                            })
                            .collect();
                        (!text.is_empty()).then_some(Ok(text))
                    }
                    Err(e) => Some(Err(ProviderError::Stream(e.to_string()))),
                }
            })
            .boxed();

        // The HTTP status only surfaces on the first poll, so a rejected
        // request shows up as an error before any token.
        match tokens.next().await {
            Some(Err(ProviderError::Stream(message))) => Err(ProviderError::Request(message)),
            Some(Err(e)) => Err(e),
            Some(Ok(first)) => Ok(stream::once(async move { Ok(first) })
                .chain(tokens)
                .boxed()),
            None => Ok(stream::empty().boxed()),
        }
    }
}
