use crate::completion::{CompletionModel, ProviderError};
use crate::model::{ModelConfig, ModelProvider};
use crate::provider::openai;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const CONNECTION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[instrument(skip(model_config), fields(model = %model_config.name))]
pub fn get_completion_llm(
    model_config: ModelConfig,
) -> Result<Arc<dyn CompletionModel>, ProviderError> {
    // Both providers speak the OpenAI chat-completion protocol.
    match model_config.provider {
        ModelProvider::Openai | ModelProvider::Anyscale => {
            let model = openai::OpenAIBaseModel::new(model_config)?;
            Ok(Arc::new(model))
        }
    }
}

/// Reads the provider credential, falling back to a `.env` file in the
/// working directory.
pub fn load_api_key(provider: ModelProvider) -> Result<String, ProviderError> {
    let var = provider.api_key_var();
    let read = || std::env::var(var).ok().filter(|v| !v.trim().is_empty());
    if let Some(key) = read() {
        return Ok(key);
    }
    if let Err(e) = dotenv::dotenv() {
        debug!("No .env file loaded: {e}");
    }
    read().ok_or_else(|| ProviderError::Configuration(format!("Failed to load {var}")))
}

/// Lists models to make sure the endpoint is reachable and the key accepted.
#[instrument(skip(config), fields(base_url = %config.base_url))]
pub async fn check_connection(config: &ModelConfig) -> Result<(), ProviderError> {
    let url = format!("{}/models", config.base_url.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .get(&url)
        .bearer_auth(&config.api_key)
        .timeout(CONNECTION_CHECK_TIMEOUT)
        .send()
        .await
        .map_err(|e| {
            ProviderError::Configuration(format!(
                "Failed to reach {}: {e}",
                config.provider.as_str()
            ))
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Configuration(format!(
            "{} rejected the connection check with status {status}",
            config.provider.as_str()
        )));
    }
    Ok(())
}

/// Resolves credentials and model name, checks the endpoint, and returns a
/// ready model. Every failure here is fatal to the caller.
#[instrument]
pub async fn connect(
    provider: ModelProvider,
    model: &str,
    base_url: Option<&str>,
) -> Result<Arc<dyn CompletionModel>, ProviderError> {
    let name = provider
        .resolve_model(model)
        .map_err(|e| ProviderError::Configuration(e.to_string()))?;
    let api_key = load_api_key(provider)?;
    let config = ModelConfig {
        name,
        provider,
        base_url: base_url
            .unwrap_or(provider.default_base_url())
            .trim_end_matches('/')
            .to_string(),
        api_key,
    };

    check_connection(&config).await?;
    debug!(model = %config.name, "Connected");
    get_completion_llm(config)
}
