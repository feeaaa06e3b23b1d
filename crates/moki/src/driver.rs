//! Interactive conversation loop and the shared streaming turn.
use crate::ux::{ChatMessageType, GenerationSpinner, style_chat_text};
use anyhow::{Context, Result};
use moki_core::chat::{ChatClient, ChatError};
use moki_core::completion::RequestContext;
use moki_core::config::TimeoutConfig;
use moki_core::conversation::Conversation;
use moki_core::prompts::{INTRODUCTION_PROMPT, INTRODUCTION_REQUEST, RESOURCE_ONLY_REQUEST};
use moki_core::resource::{ManagedInput, ResourceManager};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const EXIT_COMMANDS: &[&str] = &["exit", "quit", "bye", ":q", "end", "q"];
const HELP_COMMANDS: &[&str] = &["help", "?"];

const HELP_TEXT: &str = "\
Ask anything, or attach context to your message:
  -url:<address>   fetch a web page into the conversation
  -file:<path>     read a local file into the conversation
Type exit, quit, bye, :q, end or q to leave. Ctrl-C stops a running answer.";

const EMPTY_MESSAGE_HINT: &str = "Please provide a message to continue the conversation.";

/// A line read from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// Ctrl-C at the prompt.
    Interrupted,
    Eof,
}

/// Where the driver reads user lines from.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> Result<Line>;
}

/// Line editor backed by rustyline with in-memory history.
pub struct TerminalLines {
    editor: DefaultEditor,
}

impl TerminalLines {
    pub fn new() -> Result<Self> {
        let editor = DefaultEditor::new().context("Failed to create line editor")?;
        Ok(Self { editor })
    }
}

impl LineSource for TerminalLines {
    fn read_line(&mut self, prompt: &str) -> Result<Line> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    self.editor.add_history_entry(line.as_str())?;
                }
                Ok(Line::Text(line))
            }
            Err(ReadlineError::Interrupted) => Ok(Line::Interrupted),
            Err(ReadlineError::Eof) => Ok(Line::Eof),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Help,
    Message(String),
}

impl Command {
    /// Exit and help words match case-insensitively after trimming.
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let lowered = trimmed.to_lowercase();
        if EXIT_COMMANDS.contains(&lowered.as_str()) {
            Command::Exit
        } else if HELP_COMMANDS.contains(&lowered.as_str()) {
            Command::Help
        } else {
            Command::Message(trimmed.to_string())
        }
    }
}

/// How a streamed turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEnd {
    Completed,
    Interrupted,
    TimedOut,
    Failed(ChatError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Text printed for this turn, equal to what the conversation recorded.
    pub text: String,
    pub end: TurnEnd,
}

/// Streams a reply to `prompt` into `out` until both conduits close.
///
/// `interrupt` resolving cancels the turn; the partial reply is kept.
#[instrument(skip_all, fields(id = %conversation.id()))]
pub async fn stream_reply<W, F>(
    client: &ChatClient,
    ctx: RequestContext,
    conversation: Arc<Conversation>,
    prompt: &str,
    out: &mut W,
    spinner: Option<GenerationSpinner>,
    interrupt: F,
) -> Result<Turn>
where
    W: Write,
    F: Future<Output = ()>,
{
    let (mut rx, mut err_rx, handle) =
        client.spawn_stream_request(ctx.clone(), conversation, prompt);
    tokio::pin!(interrupt);

    let mut text = String::new();
    let mut failure = None;
    let mut interrupted = false;
    let mut tokens_open = true;
    let mut errors_open = true;

    while tokens_open || errors_open {
        tokio::select! {
            token = rx.recv(), if tokens_open => match token {
                Some(token) => {
                    if text.is_empty() {
                        if let Some(spinner) = &spinner {
                            spinner.clear();
                        }
                    }
                    write!(out, "{token}")?;
                    out.flush()?;
                    text.push_str(&token);
                }
                None => tokens_open = false,
            },
            error = err_rx.recv(), if errors_open => match error {
                Some(error) => failure = Some(error),
                None => errors_open = false,
            },
            _ = &mut interrupt, if !interrupted => {
                debug!("Interrupted, cancelling turn");
                interrupted = true;
                ctx.cancel();
            }
        }
    }
    handle.await.context("Streaming task failed")?;

    if let Some(spinner) = &spinner {
        spinner.clear();
    }
    if !text.is_empty() {
        writeln!(out)?;
    }

    let end = match failure {
        Some(error) => TurnEnd::Failed(error),
        None if interrupted => TurnEnd::Interrupted,
        None if ctx.is_done() => TurnEnd::TimedOut,
        None => TurnEnd::Completed,
    };
    debug!(?end, len = text.len(), "Turn finished");
    Ok(Turn { text, end })
}

/// Prints each skipped directive, then the list of added resources.
pub fn report_resources<W: Write>(out: &mut W, managed: &ManagedInput) -> Result<()> {
    for failure in &managed.failed {
        let text = format!("Error: {}: {}", failure.resource, failure.error);
        writeln!(out, "{}", style_chat_text(&text, ChatMessageType::Error))?;
    }
    if !managed.resources.is_empty() {
        let added = format!(
            "Resources added to conversation: {}",
            managed.resources.join(", ")
        );
        writeln!(out, "{}", style_chat_text(&added, ChatMessageType::Footer))?;
    }
    Ok(())
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Asks the model to introduce itself using a throwaway conversation.
pub async fn introduce(client: &ChatClient, ctx: &RequestContext) -> Result<String> {
    let conversation = Conversation::new(INTRODUCTION_PROMPT, 0, 0);
    let intro = client
        .send_completion_request(ctx, &conversation, INTRODUCTION_REQUEST)
        .await
        .context("Failed to get an introduction")?;
    Ok(intro.trim().to_string())
}

/// Runs the interactive loop over a conversation owned for the whole session.
pub struct Driver<L, W> {
    client: ChatClient,
    resources: ResourceManager,
    conversation: Arc<Conversation>,
    timeouts: TimeoutConfig,
    lines: L,
    out: W,
    show_spinner: bool,
}

impl<L: LineSource, W: Write> Driver<L, W> {
    pub fn new(
        client: ChatClient,
        resources: ResourceManager,
        conversation: Arc<Conversation>,
        timeouts: TimeoutConfig,
        lines: L,
        out: W,
    ) -> Self {
        Self {
            client,
            resources,
            conversation,
            timeouts,
            lines,
            out,
            show_spinner: true,
        }
    }

    pub fn with_spinner(mut self, enabled: bool) -> Self {
        self.show_spinner = enabled;
        self
    }

    pub fn conversation(&self) -> &Arc<Conversation> {
        &self.conversation
    }

    /// Reads lines until an exit word, EOF or the session deadline.
    pub async fn run<F, I>(&mut self, interrupt: F) -> Result<()>
    where
        F: Fn() -> I,
        I: Future<Output = ()>,
    {
        let session = RequestContext::with_timeout(self.timeouts.session());
        let prompt = format!("{}", style_chat_text("You: ", ChatMessageType::Prompt));

        loop {
            let line = self.lines.read_line(&prompt)?;
            if session.is_done() {
                writeln!(self.out, "Session timed out.")?;
                return Ok(());
            }

            let text = match line {
                Line::Text(text) => text,
                Line::Interrupted => {
                    writeln!(self.out, "Type exit to quit.")?;
                    continue;
                }
                Line::Eof => {
                    writeln!(self.out, "\nBye!")?;
                    return Ok(());
                }
            };

            match Command::parse(&text) {
                Command::Exit => {
                    writeln!(self.out, "Bye!")?;
                    return Ok(());
                }
                Command::Help => writeln!(self.out, "{HELP_TEXT}")?,
                Command::Message(message) => {
                    let turn = session.child_with_timeout(self.timeouts.request());
                    self.handle_message(turn, &message, interrupt()).await?;
                }
            }
        }
    }

    async fn handle_message<I>(&mut self, ctx: RequestContext, raw: &str, interrupt: I) -> Result<()>
    where
        I: Future<Output = ()>,
    {
        let managed = match self
            .resources
            .manage_resources(&self.conversation, raw)
            .await
        {
            Ok(managed) => managed,
            Err(e) => {
                self.print_error(&e.to_string())?;
                return Ok(());
            }
        };

        report_resources(&mut self.out, &managed)?;
        if managed.is_empty() {
            if managed.failed.is_empty() {
                writeln!(self.out, "{EMPTY_MESSAGE_HINT}")?;
            }
            return Ok(());
        }
        let prompt = if managed.input.is_empty() {
            RESOURCE_ONLY_REQUEST
        } else {
            managed.input.as_str()
        };

        let spinner = self
            .show_spinner
            .then(|| GenerationSpinner::new("Thinking...".to_string()));
        write!(self.out, "{} ", style_chat_text("Moki:", ChatMessageType::Assistant))?;
        let turn = stream_reply(
            &self.client,
            ctx,
            self.conversation.clone(),
            prompt,
            &mut self.out,
            spinner,
            interrupt,
        )
        .await?;
        if turn.text.is_empty() {
            writeln!(self.out)?;
        }

        match turn.end {
            TurnEnd::Completed => {}
            TurnEnd::Interrupted => {
                writeln!(self.out, "{}", style_chat_text("◼ Cancelled.", ChatMessageType::Footer))?
            }
            TurnEnd::TimedOut => self.print_error("Request timed out")?,
            TurnEnd::Failed(e) => self.print_error(&e.to_string())?,
        }
        Ok(())
    }

    fn print_error(&mut self, message: &str) -> Result<()> {
        let text = format!("Error: {message}");
        writeln!(self.out, "{}", style_chat_text(&text, ChatMessageType::Error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moki_core::TestProviderModel;
    use moki_core::completion::{ChatMessage, SenderType};
    use moki_core::resource::ResourceFetcher;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    struct ScriptedLines(VecDeque<Line>);

    impl ScriptedLines {
        fn new(lines: &[&str]) -> Self {
            Self(lines.iter().map(|l| Line::Text(l.to_string())).collect())
        }
    }

    impl LineSource for ScriptedLines {
        fn read_line(&mut self, _prompt: &str) -> Result<Line> {
            Ok(self.0.pop_front().unwrap_or(Line::Eof))
        }
    }

    fn driver(
        model: TestProviderModel,
        lines: ScriptedLines,
    ) -> Driver<ScriptedLines, Vec<u8>> {
        Driver::new(
            ChatClient::new(Arc::new(model), 0.2),
            ResourceManager::new(ResourceFetcher::new()),
            Arc::new(Conversation::new("sys", 0, 0)),
            TimeoutConfig::default(),
            lines,
            Vec::new(),
        )
        .with_spinner(false)
    }

    fn output(driver: &Driver<ScriptedLines, Vec<u8>>) -> String {
        String::from_utf8_lossy(&driver.out).to_string()
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("  EXIT "), Command::Exit);
        assert_eq!(Command::parse(":q"), Command::Exit);
        assert_eq!(Command::parse("Q"), Command::Exit);
        assert_eq!(Command::parse("?"), Command::Help);
        assert_eq!(Command::parse("Help"), Command::Help);
        assert_eq!(
            Command::parse(" quit now "),
            Command::Message("quit now".to_string())
        );
    }

    #[tokio::test]
    async fn test_stream_reply_prints_tokens() {
        let client = ChatClient::new(Arc::new(TestProviderModel::new(["Hel", "lo"])), 0.2);
        let conversation = Arc::new(Conversation::new("sys", 0, 0));
        let mut out = Vec::new();

        let turn = stream_reply(
            &client,
            RequestContext::background(),
            conversation.clone(),
            "hi",
            &mut out,
            None,
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(turn.end, TurnEnd::Completed);
        assert_eq!(turn.text, "Hello");
        assert_eq!(String::from_utf8(out).unwrap(), "Hello\n");
        assert_eq!(
            conversation.last_assistant_message(),
            Some(ChatMessage::assistant("Hello"))
        );
    }

    #[tokio::test]
    async fn test_stream_reply_interrupt_keeps_partial() {
        let model = TestProviderModel::new(["Hel"]).hang_after_chunks();
        let client = ChatClient::new(Arc::new(model), 0.2);
        let conversation = Arc::new(Conversation::new("sys", 0, 0));
        let mut out = Vec::new();

        let turn = stream_reply(
            &client,
            RequestContext::background(),
            conversation.clone(),
            "hi",
            &mut out,
            None,
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .unwrap();

        assert_eq!(turn.end, TurnEnd::Interrupted);
        assert_eq!(turn.text, "Hel");
        assert_eq!(
            conversation.last_assistant_message(),
            Some(ChatMessage::assistant("Hel"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_reply_times_out() {
        let model = TestProviderModel::new(["slow"]).hang_after_chunks();
        let client = ChatClient::new(Arc::new(model), 0.2);
        let conversation = Arc::new(Conversation::new("sys", 0, 0));
        let mut out = Vec::new();

        let turn = stream_reply(
            &client,
            RequestContext::with_timeout(Duration::from_secs(60)),
            conversation,
            "hi",
            &mut out,
            None,
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(turn.end, TurnEnd::TimedOut);
        assert_eq!(turn.text, "slow");
    }

    #[tokio::test]
    async fn test_stream_reply_reports_failure() {
        let client = ChatClient::new(Arc::new(TestProviderModel::rejecting("denied")), 0.2);
        let conversation = Arc::new(Conversation::new("sys", 0, 0));
        let mut out = Vec::new();

        let turn = stream_reply(
            &client,
            RequestContext::background(),
            conversation,
            "hi",
            &mut out,
            None,
            std::future::pending(),
        )
        .await
        .unwrap();

        assert!(matches!(turn.end, TurnEnd::Failed(ChatError::RequestFailed(m)) if m.contains("denied")));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_driver_chats_until_exit() {
        let mut driver = driver(
            TestProviderModel::new(["Hi ", "there"]),
            ScriptedLines::new(&["hello", "", "help", "bye", "never read"]),
        );

        driver.run(std::future::pending).await.unwrap();

        let out = output(&driver);
        assert!(out.contains("Hi there\n"));
        assert!(out.contains("-url:<address>"));
        assert!(out.ends_with("Bye!\n"));

        let messages = driver.conversation().messages();
        let senders: Vec<_> = messages.iter().map(|m| m.sender).collect();
        assert_eq!(
            senders,
            vec![SenderType::System, SenderType::User, SenderType::Assistant]
        );
        assert_eq!(messages[1].text, "hello");
    }

    #[tokio::test]
    async fn test_driver_stops_on_eof_and_hints_on_interrupt() {
        let lines = ScriptedLines(VecDeque::from([Line::Interrupted, Line::Eof]));
        let mut driver = driver(TestProviderModel::new(["unused"]), lines);

        driver.run(std::future::pending).await.unwrap();

        let out = output(&driver);
        assert!(out.contains("Type exit to quit."));
        assert!(out.contains("Bye!"));
        assert_eq!(driver.conversation().len(), 1);
    }

    #[tokio::test]
    async fn test_driver_attaches_file_resource() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "fn main() {{}}").unwrap();
        let line = format!("explain -file:{}", file.path().display());
        let mut driver = driver(
            TestProviderModel::new(["It is empty."]),
            ScriptedLines::new(&[line.as_str(), "exit"]),
        );

        driver.run(std::future::pending).await.unwrap();

        let out = output(&driver);
        assert!(out.contains("Resources added to conversation: file:"));
        assert!(out.contains("It is empty."));

        let messages = driver.conversation().messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].sender, SenderType::System);
        assert!(messages[1].text.contains("fn main()"));
        assert_eq!(messages[2], ChatMessage::user("explain"));
    }

    #[tokio::test]
    async fn test_driver_reports_missing_file_and_sends_rest() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port = 8080").unwrap();
        let line = format!(
            "-file:/no/such/moki/file.txt -file:{} which port?",
            file.path().display()
        );
        let mut driver = driver(
            TestProviderModel::new(["8080"]),
            ScriptedLines::new(&[line.as_str(), "q"]),
        );

        driver.run(std::future::pending).await.unwrap();

        let out = output(&driver);
        assert!(out.contains("Error: file:/no/such/moki/file.txt: File not found"));
        assert!(out.contains("Resources added to conversation: file:"));
        assert!(out.contains("8080\n"));

        let messages = driver.conversation().messages();
        let senders: Vec<_> = messages.iter().map(|m| m.sender).collect();
        assert_eq!(
            senders,
            vec![
                SenderType::System,
                SenderType::System,
                SenderType::User,
                SenderType::Assistant
            ]
        );
        assert!(messages[1].text.contains("port = 8080"));
        assert_eq!(messages[2], ChatMessage::user("which port?"));
    }

    #[tokio::test]
    async fn test_driver_hints_on_blank_message() {
        let model = Arc::new(TestProviderModel::new(["unused"]));
        let mut driver = Driver::new(
            ChatClient::new(model.clone(), 0.2),
            ResourceManager::new(ResourceFetcher::new()),
            Arc::new(Conversation::new("sys", 0, 0)),
            TimeoutConfig::default(),
            ScriptedLines::new(&["   ", "exit"]),
            Vec::new(),
        )
        .with_spinner(false);

        driver.run(std::future::pending).await.unwrap();

        assert!(output(&driver).contains(EMPTY_MESSAGE_HINT));
        assert!(model.requests().is_empty());
        assert_eq!(driver.conversation().len(), 1);
    }

    #[tokio::test]
    async fn test_driver_reports_request_failure_and_continues() {
        let mut driver = driver(
            TestProviderModel::rejecting("quota exceeded"),
            ScriptedLines::new(&["first", "second", "exit"]),
        );

        driver.run(std::future::pending).await.unwrap();

        let out = output(&driver);
        assert_eq!(out.matches("quota exceeded").count(), 2);
        // Each prompt stays without a reply.
        assert_eq!(driver.conversation().len(), 3);
    }

    #[tokio::test]
    async fn test_introduce_uses_throwaway_conversation() {
        let model = Arc::new(TestProviderModel::new(["  I am Moki.  "]));
        let client = ChatClient::new(model.clone(), 0.2);

        let intro = introduce(&client, &RequestContext::background())
            .await
            .unwrap();

        assert_eq!(intro, "I am Moki.");
        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].len(), 2);
        assert_eq!(requests[0][1].text, INTRODUCTION_REQUEST);
    }
}
