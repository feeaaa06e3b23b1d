use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Supported model provider integrations (serialized as lowercase strings).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    Openai,
    Anyscale,
}

impl From<ModelProvider> for String {
    fn from(val: ModelProvider) -> Self {
        val.as_str().into()
    }
}

impl ModelProvider {
    pub fn as_str(&self) -> &'static str {
        match &self {
            ModelProvider::Openai => "openai",
            ModelProvider::Anyscale => "anyscale",
        }
    }

    /// Environment variable holding the API credential.
    pub fn api_key_var(&self) -> &'static str {
        match &self {
            ModelProvider::Openai => "OPENAI_API_KEY",
            ModelProvider::Anyscale => "ANYSCALE_ENDPOINT_TOKEN",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match &self {
            ModelProvider::Openai => "https://api.openai.com/v1",
            ModelProvider::Anyscale => "https://api.endpoints.anyscale.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match &self {
            ModelProvider::Openai => "gpt-3.5-turbo",
            ModelProvider::Anyscale => "mistralai/Mistral-7B-Instruct-v0.1",
        }
    }

    /// `(model id, alias)` pairs known for this provider.
    pub fn models(&self) -> &'static [(&'static str, &'static str)] {
        match &self {
            ModelProvider::Openai => OPENAI_MODELS,
            ModelProvider::Anyscale => ANYSCALE_MODELS,
        }
    }

    /// Resolves a model id or alias. An empty name picks the provider default.
    pub fn resolve_model(&self, name: &str) -> Result<String, ModelError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(self.default_model().to_string());
        }
        self.models()
            .iter()
            .find(|(id, alias)| *id == name || *alias == name)
            .map(|(id, _)| id.to_string())
            .ok_or_else(|| ModelError::UnknownModel {
                provider: self.as_str(),
                model: name.to_string(),
            })
    }
}

impl FromStr for ModelProvider {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ModelProvider::Openai),
            "anyscale" => Ok(ModelProvider::Anyscale),
            other => Err(ModelError::UnknownProvider(other.to_string())),
        }
    }
}

const OPENAI_MODELS: &[(&str, &str)] = &[("gpt-3.5-turbo", "turbo")];

const ANYSCALE_MODELS: &[(&str, &str)] = &[
    ("mistralai/Mistral-7B-Instruct-v0.1", "m7b"),
    ("mistralai/Mixtral-8x7B-Instruct-v0.1", "m8x7b"),
    ("meta-llama/Llama-2-7b-chat-hf", "l7b"),
    ("meta-llama/Llama-2-13b-chat-hf", "l13b"),
    ("meta-llama/Llama-2-70b-chat-hf", "l70b"),
    ("codellama/CodeLlama-34b-Instruct-hf", "cl34b"),
    ("codellama/CodeLlama-70b-Instruct-hf", "cl70b"),
];

/// Connection settings for a provider endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub name: String,
    pub provider: ModelProvider,
    pub base_url: String,
    pub api_key: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Unknown model '{model}' for provider {provider}")]
    UnknownModel {
        provider: &'static str,
        model: String,
    },
}
