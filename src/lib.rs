//! Lateral: model sidecars over line-delimited JSON
//!
//! A family of single-purpose subprocess servers ("sidecars") that expose
//! local model capabilities to a parent process over stdin/stdout. Each
//! process speaks the same protocol: one JSON request per input line, one or
//! more JSON response lines per request, every line flushed as it is written.
//!
//! The four sidecars:
//!
//! - **llm**: text generation and chat with streaming output
//! - **embedding**: pooled text embeddings, single or batch
//! - **vision**: multi-vector document embeddings for late interaction
//!   retrieval
//! - **downloader**: model artifact download, listing, and deletion
//!
//! Alongside the servers, [`late_interaction`] provides the MaxSim scorer
//! and ranker used to match multi-vector queries against document pages.
//!
//! # Example
//!
//! ```rust
//! use lateral::late_interaction::{LateInteractionScorer, MultiVectorEmbedding};
//!
//! # fn main() -> Result<(), lateral::LateralError> {
//! let query = MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0], vec![0.0, 1.0]])?;
//! let page = MultiVectorEmbedding::from_rows(vec![vec![0.8, 0.6]])?;
//!
//! let score = LateInteractionScorer::max_sim(&query, &page)?;
//! assert!(score > 0.0);
//! # Ok(())
//! # }
//! ```
//!
//! # Process model
//!
//! Sidecars are strictly synchronous: one request is handled to completion
//! before the next line is read, so the parent never sees interleaved
//! responses. Closing the child's stdin is the shutdown signal; the process
//! drains nothing and exits 0.

pub mod backend;
pub mod config;
pub mod error;
pub mod late_interaction;
pub mod server;

pub use error::LateralError;
pub use late_interaction::{LateInteractionScorer, MultiVectorEmbedding, RankedDocument};
pub use server::{
    Command, DownloaderServer, EmbeddingServer, LlmServer, Response, VisionServer,
};
