//! The sidecar server family.
//!
//! Four single-purpose servers share one protocol, one run loop, and one
//! lifecycle state machine:
//!
//! - [`LlmServer`]: text generation (`generate`, `chat`)
//! - [`EmbeddingServer`]: pooled text embeddings (`embed`)
//! - [`VisionServer`]: multi-vector document embeddings (`embed` + images)
//! - [`DownloaderServer`]: model artifact management (`download`, `list`,
//!   `delete`)
//!
//! Each server is a [`runloop::CommandHandler`]; [`runloop::run`] drives it
//! over stdin/stdout until the parent closes the pipe.

pub mod downloader;
pub mod embedding;
pub mod generation;
pub mod lifecycle;
pub mod llm;
pub mod progress;
pub mod protocol;
pub mod runloop;
pub mod vision;

pub use downloader::DownloaderServer;
pub use embedding::EmbeddingServer;
pub use lifecycle::{LifecycleManager, LifecycleState, LoadOutcome, ModelBinding};
pub use llm::LlmServer;
pub use progress::ProgressReporter;
pub use protocol::{Command, EmbedInput, EmbeddingVectors, LocalModel, Response};
pub use runloop::{run, CommandHandler, ResponseWriter};
pub use vision::VisionServer;
