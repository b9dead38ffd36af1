//! Line protocol for the sidecar family.
//!
//! One JSON object per line in each direction. Requests are tagged by a
//! `command` discriminator; responses serialize flat with a `success` boolean
//! (streaming chunks and progress events additionally carry a `type` tag).
//! Only well-formed response lines may ever reach stdout, since the parent
//! parses every output line.

use serde::{Deserialize, Serialize};
use serde::ser::{SerializeMap, Serializer};

use crate::error::LateralError;

/// Default generation budget when the request leaves it unset.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default nucleus sampling threshold.
pub const DEFAULT_TOP_P: f32 = 0.9;

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}
fn default_top_p() -> f32 {
    DEFAULT_TOP_P
}
fn default_stream() -> bool {
    true
}
fn default_revision() -> String {
    "main".to_string()
}

/// A request from the parent process.
///
/// Unrecognized extra fields are ignored; missing required fields are a
/// decode error, surfaced as an `Error` response by the run loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Ping,
    Status,
    Load {
        model_path: String,
        #[serde(default)]
        adapter_path: Option<String>,
    },
    Unload,
    Embed {
        text: EmbedInput,
        #[serde(default)]
        model: Option<String>,
        /// Page image paths for the vision sidecar; the query text doubles
        /// as the extraction prompt when images are present.
        #[serde(default)]
        images: Option<Vec<String>>,
    },
    Generate {
        prompt: String,
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
        #[serde(default = "default_temperature")]
        temperature: f32,
        #[serde(default = "default_top_p")]
        top_p: f32,
        #[serde(default = "default_stream")]
        stream: bool,
    },
    Chat {
        messages: Vec<ChatTurn>,
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
        #[serde(default = "default_temperature")]
        temperature: f32,
        #[serde(default = "default_top_p")]
        top_p: f32,
        #[serde(default = "default_stream")]
        stream: bool,
    },
    Download {
        repo_id: String,
        #[serde(default)]
        local_dir: Option<String>,
        #[serde(default = "default_revision")]
        revision: String,
        #[serde(default)]
        allow_patterns: Option<Vec<String>>,
        #[serde(default)]
        ignore_patterns: Option<Vec<String>>,
    },
    List,
    Delete {
        model_path: String,
    },
}

const KNOWN_COMMANDS: &[&str] = &[
    "ping", "status", "load", "unload", "embed", "generate", "chat", "download", "list", "delete",
];

impl Command {
    /// Wire name of the command, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Status => "status",
            Command::Load { .. } => "load",
            Command::Unload => "unload",
            Command::Embed { .. } => "embed",
            Command::Generate { .. } => "generate",
            Command::Chat { .. } => "chat",
            Command::Download { .. } => "download",
            Command::List => "list",
            Command::Delete { .. } => "delete",
        }
    }
}

/// One chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Embed input: a single string or a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbedInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbedInput {
    /// View as a batch regardless of arity.
    pub fn texts(&self) -> Vec<String> {
        match self {
            EmbedInput::Single(s) => vec![s.clone()],
            EmbedInput::Batch(v) => v.clone(),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, EmbedInput::Batch(_))
    }
}

/// Embedding payload: arity mirrors the request (single vector for a single
/// text, batch for a batch, one matrix per input for multi-vector output).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EmbeddingVectors {
    Single(Vec<f64>),
    Batch(Vec<Vec<f64>>),
    MultiVector(Vec<Vec<Vec<f64>>>),
}

/// One locally downloaded model, as reported by the `list` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalModel {
    pub name: String,
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
}

/// A response line to the parent process.
///
/// Chunk and progress events are implicitly successful; everything else
/// carries an explicit `success` boolean.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Stateless acknowledgement (ping, unload).
    Ack { message: String },
    /// Lifecycle status snapshot.
    Status {
        model_loaded: Option<String>,
        ready: bool,
    },
    /// Embedding result with its dimension.
    Embeddings {
        embeddings: EmbeddingVectors,
        dimensions: usize,
    },
    /// Streaming generation chunk: full accumulated text, never terminal.
    Chunk { content: String },
    /// Terminal generation message: exactly one per request.
    Complete { content: String },
    /// Download started.
    DownloadStarted { repo_id: String, local_dir: String },
    /// Throttled download progress.
    Progress {
        downloaded: u64,
        total: u64,
        percentage: f64,
        current_file: String,
        downloaded_files: u32,
        total_files: u32,
    },
    /// Terminal download success.
    DownloadComplete {
        repo_id: String,
        local_path: String,
        size: u64,
    },
    /// Local model listing.
    Models { models: Vec<LocalModel> },
    /// Recoverable failure; the parent parses it like any other line.
    Error { error: String },
}

impl Response {
    pub fn ack(message: impl Into<String>) -> Self {
        Response::Ack {
            message: message.into(),
        }
    }

    pub fn pong() -> Self {
        Response::ack("pong")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Response::Ack { message } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("message", message)?;
                map.end()
            }
            Response::Status {
                model_loaded,
                ready,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("model_loaded", model_loaded)?;
                map.serialize_entry("ready", ready)?;
                map.end()
            }
            Response::Embeddings {
                embeddings,
                dimensions,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("embeddings", embeddings)?;
                map.serialize_entry("dimensions", dimensions)?;
                map.end()
            }
            Response::Chunk { content } => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("type", "chunk")?;
                map.serialize_entry("content", content)?;
                map.serialize_entry("done", &false)?;
                map.end()
            }
            Response::Complete { content } => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("type", "complete")?;
                map.serialize_entry("content", content)?;
                map.serialize_entry("done", &true)?;
                map.end()
            }
            Response::DownloadStarted {
                repo_id,
                local_dir,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "start")?;
                map.serialize_entry("repo_id", repo_id)?;
                map.serialize_entry("local_dir", local_dir)?;
                map.end()
            }
            Response::Progress {
                downloaded,
                total,
                percentage,
                current_file,
                downloaded_files,
                total_files,
            } => {
                let mut map = serializer.serialize_map(Some(7))?;
                map.serialize_entry("type", "progress")?;
                map.serialize_entry("downloaded", downloaded)?;
                map.serialize_entry("total", total)?;
                map.serialize_entry("percentage", percentage)?;
                map.serialize_entry("current_file", current_file)?;
                map.serialize_entry("downloaded_files", downloaded_files)?;
                map.serialize_entry("total_files", total_files)?;
                map.end()
            }
            Response::DownloadComplete {
                repo_id,
                local_path,
                size,
            } => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("type", "complete")?;
                map.serialize_entry("repo_id", repo_id)?;
                map.serialize_entry("local_path", local_path)?;
                map.serialize_entry("size", size)?;
                map.end()
            }
            Response::Models { models } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("models", models)?;
                map.end()
            }
            Response::Error { error } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
                map.end()
            }
        }
    }
}

/// Parse one input line into a command.
///
/// Malformed JSON, a missing/unknown discriminator, and missing required
/// fields are all decode errors, recovered by the run loop and never fatal.
pub fn decode_command(line: &str) -> Result<Command, LateralError> {
    let value: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| LateralError::decode(format!("Invalid JSON: {e}")))?;
    let Some(name) = value.get("command").and_then(|v| v.as_str()).map(str::to_string) else {
        return Err(LateralError::decode(
            "Invalid request: missing \"command\" field",
        ));
    };
    if !KNOWN_COMMANDS.contains(&name.as_str()) {
        return Err(LateralError::decode(format!("Unknown command: {name}")));
    }
    serde_json::from_value(value)
        .map_err(|e| LateralError::decode(format!("Invalid {name} request: {e}")))
}

/// Serialize one response to exactly one line (no trailing newline, no
/// embedded newlines; JSON string escaping guarantees the latter).
pub fn encode_response(response: &Response) -> String {
    // Serialization of these shapes cannot fail; fall back to a minimal
    // error line rather than panic if it ever does.
    serde_json::to_string(response)
        .unwrap_or_else(|e| format!(r#"{{"success":false,"error":"encode failure: {e}"}}"#))
}
