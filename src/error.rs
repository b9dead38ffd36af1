//! Error types for the lateral crate.

use thiserror::Error;

/// Errors produced by the sidecar servers and the late interaction scorer.
///
/// Every per-request failure is recoverable: the run loop converts it into an
/// `Error` response line and keeps serving. Only [`LateralError::DependencyUnavailable`]
/// is fatal, and only before a server enters its loop.
#[derive(Debug, Error)]
pub enum LateralError {
    /// The input line was not a well-formed command (bad JSON, unknown
    /// discriminator, or missing required fields).
    #[error("{0}")]
    Decode(String),

    /// A required collaborator is missing at startup. Fatal; the process
    /// exits nonzero before entering the run loop.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The operation requires a loaded model. Loads are always explicit.
    #[error("No model loaded. Load a model first.")]
    ModelNotLoaded,

    /// The backend rejected a load request. The lifecycle reverts to
    /// unloaded; the backend's message is preserved verbatim.
    #[error("{0}")]
    LoadFailure(String),

    /// An embedding, generation, or download call failed mid-request.
    #[error("{0}")]
    Backend(String),

    /// Scorer inputs with incompatible embedding dimensions.
    #[error("Dimension mismatch: query dimension {query}, document dimension {document}")]
    DimensionMismatch {
        /// Dimension of the query embedding rows
        query: usize,
        /// Dimension of the document embedding rows
        document: usize,
    },

    /// A request field was present but unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LateralError {
    /// Create a decode error for a malformed request line.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a backend failure preserving the collaborator's message.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Create a load failure preserving the collaborator's message.
    pub fn load_failure(message: impl Into<String>) -> Self {
        Self::LoadFailure(message.into())
    }
}
