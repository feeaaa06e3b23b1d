//! Resource injection: `-url:` and `-file:` directives in user input, plus
//! piped standard input, are fetched and added to the conversation as system
//! messages before the question is sent.
use crate::completion::{ChatMessage, MessagePart, SenderType};
use crate::conversation::{Conversation, ConversationError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

static DIRECTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|\s+)-(url|file):(\S+)").expect("valid directive regex"));

/// Label used for content read from piped standard input.
pub const PIPED_INPUT_LABEL: &str = "User Input";

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Invalid URL '{0}': a scheme and host are required")]
    InvalidUrl(String),
    #[error("Failed to fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode resource: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Conversation(#[from] ConversationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Url,
    File,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Url => "url",
            ResourceKind::File => "file",
        }
    }
}

/// A parsed `-kind:locator` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub locator: String,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.locator)
    }
}

/// Finds every directive in `input`, in order of appearance.
pub fn scan_directives(input: &str) -> Vec<ResourceRef> {
    DIRECTIVE_RE
        .captures_iter(input)
        .map(|caps| {
            let kind = if caps[1].eq_ignore_ascii_case("url") {
                ResourceKind::Url
            } else {
                ResourceKind::File
            };
            ResourceRef {
                kind,
                locator: caps[2].to_string(),
            }
        })
        .collect()
}

/// Removes every directive from `input`.
pub fn strip_directives(input: &str) -> String {
    DIRECTIVE_RE.replace_all(input, "").trim().to_string()
}

#[derive(Serialize)]
struct FilePayload<'a> {
    path: &'a str,
    contents: &'a str,
}

/// Fetches URLs and files and appends them to a conversation.
#[derive(Debug, Clone, Default)]
pub struct ResourceFetcher {
    client: reqwest::Client,
}

impl ResourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn add_resource(
        &self,
        conversation: &Conversation,
        resource: &ResourceRef,
    ) -> Result<(), ResourceError> {
        match resource.kind {
            ResourceKind::Url => self.add_url(conversation, &resource.locator).await,
            ResourceKind::File => self.add_file(conversation, &resource.locator).await,
        }
    }

    /// Downloads `locator` and appends source, status and body.
    ///
    /// Any HTTP status is accepted and recorded; only transport failures are
    /// errors. The body is read fully into memory.
    #[instrument(skip(self, conversation))]
    pub async fn add_url(
        &self,
        conversation: &Conversation,
        locator: &str,
    ) -> Result<(), ResourceError> {
        let url = Url::parse(locator).map_err(|_| ResourceError::InvalidUrl(locator.to_string()))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ResourceError::InvalidUrl(locator.to_string()));
        }

        info!("Downloading {url}");
        let fetch_failed = |e: reqwest::Error| ResourceError::FetchFailed {
            url: locator.to_string(),
            reason: e.to_string(),
        };
        let response = self.client.get(url).send().await.map_err(fetch_failed)?;
        let status = response.status();
        let status_line = match status.canonical_reason() {
            Some(reason) => format!("{} {reason}", status.as_str()),
            None => status.as_str().to_string(),
        };
        let body = response.text().await.map_err(fetch_failed)?;
        debug!(status = %status_line, bytes = body.len(), "Fetched resource");

        let message = ChatMessage::from_parts(
            SenderType::System,
            vec![
                MessagePart::Source {
                    label: "URL".to_string(),
                    locator: locator.to_string(),
                },
                MessagePart::Status(status_line),
                MessagePart::Body(body),
            ],
        )
        .with_name(locator);
        conversation.append(message)?;
        Ok(())
    }

    /// Reads a local file and appends it as a `{"path", "contents"}` object.
    /// A leading `~` expands to the home directory.
    #[instrument(skip(self, conversation))]
    pub async fn add_file(
        &self,
        conversation: &Conversation,
        locator: &str,
    ) -> Result<(), ResourceError> {
        let path = PathBuf::from(shellexpand::tilde(locator).as_ref());
        let io_error = |source| ResourceError::Io {
            path: locator.to_string(),
            source,
        };
        if !tokio::fs::try_exists(&path).await.map_err(io_error)? {
            return Err(ResourceError::FileNotFound(locator.to_string()));
        }

        info!("Uploading file from {}", path.display());
        let bytes = tokio::fs::read(&path).await.map_err(io_error)?;
        let contents = String::from_utf8_lossy(&bytes);
        let payload = serde_json::to_string(&FilePayload {
            path: locator,
            contents: &contents,
        })?;

        conversation.append(ChatMessage::system(payload).with_name(locator))?;
        Ok(())
    }

    /// Appends free-form reference content under `label`.
    pub fn add_reference(
        &self,
        conversation: &Conversation,
        label: &str,
        content: &str,
    ) -> Result<(), ResourceError> {
        let message = ChatMessage::from_parts(
            SenderType::System,
            vec![
                MessagePart::Source {
                    label: "Reference".to_string(),
                    locator: label.to_string(),
                },
                MessagePart::Body(content.to_string()),
            ],
        )
        .with_name(label);
        conversation.append(message)?;
        Ok(())
    }
}

/// A directive that could not be added.
#[derive(Debug)]
pub struct ResourceFailure {
    /// `kind:locator` as written by the user.
    pub resource: String,
    pub error: ResourceError,
}

/// Input left after resource handling.
#[derive(Debug, Default)]
pub struct ManagedInput {
    /// User text with every directive removed.
    pub input: String,
    /// `kind:locator` for each resource added, `stdin` for piped input.
    pub resources: Vec<String>,
    /// Directives skipped because fetching or reading them failed.
    pub failed: Vec<ResourceFailure>,
}

impl ManagedInput {
    /// True when there is neither a question nor any added resource.
    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.resources.is_empty()
    }
}

type PipedReader = Box<dyn Read + Send>;

/// Rewrites user input by resolving resource directives and piped input.
pub struct ResourceManager {
    fetcher: ResourceFetcher,
    scan_directives: bool,
    piped_input: Mutex<Option<PipedReader>>,
}

impl ResourceManager {
    pub fn new(fetcher: ResourceFetcher) -> Self {
        Self {
            fetcher,
            scan_directives: true,
            piped_input: Mutex::new(None),
        }
    }

    /// Leaves `-url:`/`-file:` text untouched when disabled.
    pub fn with_directives(mut self, enabled: bool) -> Self {
        self.scan_directives = enabled;
        self
    }

    /// Attaches a non-interactive input stream that is read on the next call.
    pub fn with_piped_input(self, reader: impl Read + Send + 'static) -> Self {
        *self
            .piped_input
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(reader));
        self
    }

    /// Attaches the process stdin when it is a pipe or file rather than a terminal.
    pub fn with_process_stdin(self) -> Self {
        if std::io::stdin().is_terminal() {
            self
        } else {
            self.with_piped_input(std::io::stdin())
        }
    }

    pub fn fetcher(&self) -> &ResourceFetcher {
        &self.fetcher
    }

    async fn read_piped_input(&self) -> Result<Option<String>, ResourceError> {
        let reader = self
            .piped_input
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut reader) = reader else {
            return Ok(None);
        };

        let read = tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map(|_| buf)
        })
        .await
        .map_err(|e| ResourceError::Io {
            path: "stdin".to_string(),
            source: std::io::Error::other(e),
        })?;
        let bytes = read.map_err(|source| ResourceError::Io {
            path: "stdin".to_string(),
            source,
        })?;

        let content = String::from_utf8_lossy(&bytes).trim().to_string();
        Ok((!content.is_empty()).then_some(content))
    }

    /// Adds piped input and every directive in `raw_input` to `conversation`,
    /// returning the cleaned input and the list of added resources.
    ///
    /// A directive that cannot be fetched or read is recorded in
    /// `ManagedInput::failed` and the rest are still processed. A full
    /// conversation or a failed stdin read aborts the call.
    #[instrument(skip(self, conversation, raw_input), fields(id = %conversation.id()))]
    pub async fn manage_resources(
        &self,
        conversation: &Conversation,
        raw_input: &str,
    ) -> Result<ManagedInput, ResourceError> {
        let mut managed = ManagedInput::default();

        if let Some(content) = self.read_piped_input().await? {
            self.fetcher
                .add_reference(conversation, PIPED_INPUT_LABEL, &content)?;
            managed.resources.push("stdin".to_string());
        }

        if !self.scan_directives {
            managed.input = raw_input.trim().to_string();
            return Ok(managed);
        }

        for resource in scan_directives(raw_input) {
            debug!(%resource, "Adding resource");
            match self.fetcher.add_resource(conversation, &resource).await {
                Ok(()) => managed.resources.push(resource.to_string()),
                Err(error @ ResourceError::Conversation(_)) => return Err(error),
                Err(error) => {
                    warn!(%resource, "Skipping resource: {error}");
                    managed.failed.push(ResourceFailure {
                        resource: resource.to_string(),
                        error,
                    });
                }
            }
        }
        managed.input = strip_directives(raw_input);
        Ok(managed)
    }
}
