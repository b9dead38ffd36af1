//! Text-embedding sidecar.
//!
//! Serves `ping`, `status`, `load`, `unload`, and `embed`. The response
//! arity mirrors the request: a single text yields one vector, a batch
//! yields one vector per text.

use std::io::Write;

use crate::backend::{EmbeddingBackend, EmbeddingModel};
use crate::error::LateralError;
use crate::server::lifecycle::{LifecycleManager, ModelBinding};
use crate::server::protocol::{Command, EmbedInput, EmbeddingVectors, Response};
use crate::server::runloop::{CommandHandler, ResponseWriter};

/// Command handler for the embedding sidecar.
pub struct EmbeddingServer<B: EmbeddingBackend> {
    backend: B,
    lifecycle: LifecycleManager<B::Model>,
}

impl<B: EmbeddingBackend> EmbeddingServer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            lifecycle: LifecycleManager::new(),
        }
    }

    fn embed(
        &mut self,
        input: &EmbedInput,
        requested_model: Option<&str>,
    ) -> Result<Response, LateralError> {
        // Loads are explicit only: a model hint that does not match the
        // loaded binding is rejected rather than triggering a load.
        if let Some(requested) = requested_model {
            match self.lifecycle.loaded_identifier() {
                Some(loaded) if loaded == requested => {}
                Some(loaded) => {
                    return Err(LateralError::InvalidInput(format!(
                        "Requested model {requested} does not match loaded model {loaded}"
                    )));
                }
                None => return Err(LateralError::ModelNotLoaded),
            }
        }
        let model = self.lifecycle.model_mut()?;
        let texts = input.texts();
        let mut vectors = model.embed(&texts)?;
        let dimensions = model.dimensions();
        let embeddings = if input.is_batch() {
            EmbeddingVectors::Batch(vectors)
        } else {
            // single text, single vector
            EmbeddingVectors::Single(vectors.pop().unwrap_or_default())
        };
        Ok(Response::Embeddings {
            embeddings,
            dimensions,
        })
    }
}

impl<B: EmbeddingBackend> CommandHandler for EmbeddingServer<B> {
    fn handle<W: Write>(
        &mut self,
        command: Command,
        _writer: &mut ResponseWriter<W>,
    ) -> Result<Response, LateralError> {
        match command {
            Command::Ping => Ok(Response::pong()),
            Command::Status => Ok(Response::Status {
                model_loaded: self.lifecycle.loaded_identifier().map(str::to_string),
                ready: self.lifecycle.ready(),
            }),
            Command::Load { model_path, .. } => {
                let message = format!("Model loaded: {model_path}");
                let backend = &mut self.backend;
                self.lifecycle
                    .load_with(ModelBinding::new(model_path), |b| {
                        backend.load(&b.model_path)
                    })?;
                Ok(Response::ack(message))
            }
            Command::Unload => {
                self.lifecycle.unload();
                Ok(Response::ack("Model unloaded"))
            }
            Command::Embed { text, model, .. } => self.embed(&text, model.as_deref()),
            other => Err(LateralError::decode(format!(
                "Unsupported command: {}",
                other.name()
            ))),
        }
    }
}
