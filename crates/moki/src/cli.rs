//! Moki app cli definition and entrypoint.
use crate::ask::{AskSettings, run_ask};
use crate::driver::{Driver, TerminalLines, ctrl_c, introduce};
use crate::log::setup_logging;
use crate::ux::{ChatMessageType, style_chat_text};
use anyhow::{Context, Result};
use clap::Parser;
use moki_core::chat::ChatClient;
use moki_core::completion::RequestContext;
use moki_core::config::{Config, get_config};
use moki_core::connect;
use moki_core::conversation::Conversation;
use moki_core::model::ModelProvider;
use moki_core::prompts::CONVERSATION_PROMPT;
use moki_core::resource::{ResourceFetcher, ResourceManager};
use std::sync::Arc;
use tracing::{debug, info};

/// Moki - an AI assistant for the command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// LLM provider: openai or anyscale.
    #[arg(short, long)]
    pub llm: Option<ModelProvider>,

    /// Model id or alias, e.g. turbo or m8x7b.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Sampling temperature between 0.0 and 1.0.
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// Maximum number of messages in the conversation.
    #[arg(long)]
    pub max_messages: Option<usize>,

    /// Maximum tokens generated per response.
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Start an interactive conversation.
    #[arg(short, long)]
    pub conversation: bool,

    /// Write debug logs to the data directory.
    #[arg(short, long)]
    pub debug: bool,

    /// Do not scan input for -url: and -file: directives.
    #[arg(long)]
    pub no_resources: bool,

    /// Question to ask.
    pub question: Vec<String>,
}

impl Cli {
    /// Applies command line overrides on top of the file configuration.
    pub fn apply(&self, mut config: Config) -> Result<Config> {
        if let Some(provider) = self.llm {
            if provider != config.provider {
                // The configured model belongs to the other provider.
                config.model = String::new();
                config.base_url = None;
            }
            config.provider = provider;
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(max_messages) = self.max_messages {
            config.max_messages = max_messages;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_tokens = max_tokens;
        }
        if self.no_resources {
            config.resources = false;
        }
        config.validate().context("Invalid options")?;
        Ok(config)
    }

    pub fn question(&self) -> String {
        self.question.join(" ")
    }
}

/// Runs the main CLI application.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        setup_logging().context("Failed to set up logging")?;
    }

    let config = get_config(None).context("Failed to load configuration")?;
    let config = cli.apply(config)?;
    debug!(?config, "Resolved configuration");

    let model = connect(config.provider, &config.model, config.base_url.as_deref())
        .await
        .context("Failed to connect to the model provider")?;
    info!(model = model.name(), "Model ready");
    let client = ChatClient::new(model, config.temperature);
    let resources =
        ResourceManager::new(ResourceFetcher::new()).with_directives(config.resources);

    if cli.conversation {
        run_conversation(client, resources, &config).await
    } else {
        let settings = AskSettings {
            max_messages: config.max_messages,
            max_tokens: config.max_tokens,
            request_timeout: config.timeouts.request(),
            show_spinner: true,
        };
        let resources = resources.with_process_stdin();
        let mut stdout = std::io::stdout();
        run_ask(
            &client,
            &resources,
            settings,
            &cli.question(),
            &mut stdout,
            ctrl_c(),
        )
        .await?;
        Ok(())
    }
}

async fn run_conversation(
    client: ChatClient,
    resources: ResourceManager,
    config: &Config,
) -> Result<()> {
    let intro_ctx = RequestContext::with_timeout(config.timeouts.request());
    match introduce(&client, &intro_ctx).await {
        Ok(intro) => println!(
            "{} {intro}",
            style_chat_text("Moki:", ChatMessageType::Assistant)
        ),
        Err(e) => println!(
            "{}",
            style_chat_text(&format!("Error: {e:#}"), ChatMessageType::Error)
        ),
    }

    let conversation = Arc::new(Conversation::new(
        CONVERSATION_PROMPT,
        config.max_messages,
        config.max_tokens,
    ));
    let mut driver = Driver::new(
        client,
        resources,
        conversation,
        config.timeouts.clone(),
        TerminalLines::new()?,
        std::io::stdout(),
    );
    driver.run(ctrl_c).await
}
