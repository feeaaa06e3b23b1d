//! One-shot mode: answer a single question and exit.
use crate::driver::{TurnEnd, report_resources, stream_reply};
use crate::ux::{ChatMessageType, GenerationSpinner, style_chat_text};
use anyhow::{Context, Result, anyhow};
use moki_core::chat::ChatClient;
use moki_core::completion::RequestContext;
use moki_core::conversation::Conversation;
use moki_core::prompts::{REQUEST_PROMPT, RESOURCE_ONLY_REQUEST, SEED_EXAMPLES};
use moki_core::resource::ResourceManager;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AskSettings {
    pub max_messages: usize,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    pub show_spinner: bool,
}

/// Answers `question`, with any directives and piped input attached, and
/// returns the conversation used.
///
/// A failed request and a request that timed out before any text arrived
/// are errors. Skipped directives are printed and the question is still sent.
/// An interrupted or partially timed out answer is kept.
pub async fn run_ask<W, F>(
    client: &ChatClient,
    resources: &ResourceManager,
    settings: AskSettings,
    question: &str,
    out: &mut W,
    interrupt: F,
) -> Result<Arc<Conversation>>
where
    W: Write,
    F: Future<Output = ()>,
{
    let conversation = Arc::new(Conversation::new(
        REQUEST_PROMPT,
        settings.max_messages,
        settings.max_tokens,
    ));
    let seeded = conversation.seed(SEED_EXAMPLES.iter().copied());
    debug!(seeded, "Seeded conversation");

    let managed = resources
        .manage_resources(&conversation, question)
        .await
        .context("Failed to add resources")?;
    report_resources(out, &managed)?;
    if managed.is_empty() {
        if managed.failed.is_empty() {
            writeln!(out, "Please provide a question to ask Moki")?;
        }
        return Ok(conversation);
    }
    let prompt = if managed.input.is_empty() {
        RESOURCE_ONLY_REQUEST
    } else {
        managed.input.as_str()
    };

    let spinner = settings
        .show_spinner
        .then(|| GenerationSpinner::new("Thinking...".to_string()));
    let turn = stream_reply(
        client,
        RequestContext::with_timeout(settings.request_timeout),
        conversation.clone(),
        prompt,
        out,
        spinner,
        interrupt,
    )
    .await?;

    match turn.end {
        TurnEnd::Completed => Ok(conversation),
        TurnEnd::Interrupted => {
            writeln!(out, "{}", style_chat_text("◼ Cancelled.", ChatMessageType::Footer))?;
            Ok(conversation)
        }
        // A timed out answer that printed something is kept like a cancelled one.
        TurnEnd::TimedOut if !turn.text.is_empty() => {
            writeln!(out, "{}", style_chat_text("◼ Timed out.", ChatMessageType::Footer))?;
            Ok(conversation)
        }
        TurnEnd::TimedOut => Err(anyhow!(
            "Request timed out after {}s",
            settings.request_timeout.as_secs()
        )),
        TurnEnd::Failed(e) => Err(e).context("Failed to get an answer"),
    }
}
