//! Vision-document embedding sidecar.
//!
//! Serves `ping`, `status`, `load`, `unload`, and `embed`. Unlike the text
//! sidecar, embeddings here are multi-vector: one L2-normalized row per
//! token or image patch. A text-only `embed` returns the query matrix (an
//! array of row vectors); an `embed` with `images` returns one matrix per
//! page image, embedded with the query text as the extraction prompt.

use std::io::Write;

use crate::backend::{VisionBackend, VisionModel};
use crate::error::LateralError;
use crate::late_interaction::MultiVectorEmbedding;
use crate::server::lifecycle::{LifecycleManager, ModelBinding};
use crate::server::protocol::{Command, EmbedInput, EmbeddingVectors, Response};
use crate::server::runloop::{CommandHandler, ResponseWriter};

/// Command handler for the vision sidecar.
pub struct VisionServer<B: VisionBackend> {
    backend: B,
    lifecycle: LifecycleManager<B::Model>,
}

impl<B: VisionBackend> VisionServer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            lifecycle: LifecycleManager::new(),
        }
    }

    fn embed(
        &mut self,
        input: &EmbedInput,
        images: Option<&[String]>,
    ) -> Result<Response, LateralError> {
        let model = self.lifecycle.model_mut()?;
        match images {
            Some(paths) if !paths.is_empty() => {
                let mut matrices = Vec::with_capacity(paths.len());
                let mut dimensions = 0;
                for path in paths {
                    let mv = model.embed_image(path)?;
                    dimensions = mv.dimension();
                    matrices.push(matrix_rows(&mv));
                }
                Ok(Response::Embeddings {
                    embeddings: EmbeddingVectors::MultiVector(matrices),
                    dimensions,
                })
            }
            _ => {
                let texts = input.texts();
                let query = texts
                    .first()
                    .ok_or_else(|| LateralError::InvalidInput("empty embed input".to_string()))?;
                let mv = model.embed_query(query)?;
                let dimensions = mv.dimension();
                Ok(Response::Embeddings {
                    embeddings: EmbeddingVectors::Batch(matrix_rows(&mv)),
                    dimensions,
                })
            }
        }
    }
}

fn matrix_rows(mv: &MultiVectorEmbedding) -> Vec<Vec<f64>> {
    mv.iter()
        .map(|row| row.iter().map(|&x| f64::from(x)).collect())
        .collect()
}

impl<B: VisionBackend> CommandHandler for VisionServer<B> {
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
            Command::Embed { text, images, .. } => self.embed(&text, images.as_deref()),
            other => Err(LateralError::decode(format!(
                "Unsupported command: {}",
                other.name()
            ))),
        }
    }
}
