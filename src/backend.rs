//! Collaborator interfaces for the sidecar servers.
//!
//! The model runtime, download mechanics, and vision feature extraction are
//! external collaborators. The servers only decide *when* they are invoked
//! and *how* their output is framed, so each capability is reached through a
//! narrow trait here. Deterministic stub implementations back the binary and
//! the tests; a real runtime plugs in by implementing the same traits.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::error::LateralError;
use crate::late_interaction::MultiVectorEmbedding;

// ============================================================================
// Generation
// ============================================================================

/// Sampling parameters for one generation request.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Stream of partial generation output.
///
/// Each item carries the full accumulated text so far (cumulative framing,
/// matching the protocol's chunk contract). `Ok(None)` signals completion.
/// The stream is restartable per call, not resumable mid-stream: dropping it
/// abandons the generation.
pub trait ChunkStream {
    fn next_chunk(&mut self) -> Result<Option<String>, LateralError>;
}

/// A loaded text-generation model.
pub trait GenerationModel {
    /// Start generating for a prompt. The returned stream is drained
    /// synchronously by the coordinator.
    fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Box<dyn ChunkStream + '_>, LateralError>;
}

/// Loader for text-generation models.
pub trait GenerationBackend {
    type Model: GenerationModel;

    fn load(
        &mut self,
        model_path: &str,
        adapter_path: Option<&str>,
    ) -> Result<Self::Model, LateralError>;
}

// ============================================================================
// Text embedding
// ============================================================================

/// A loaded text-embedding model producing one pooled vector per text.
pub trait EmbeddingModel {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f64>>, LateralError>;

    /// Output vector length.
    fn dimensions(&self) -> usize;
}

/// Loader for text-embedding models.
pub trait EmbeddingBackend {
    type Model: EmbeddingModel;

    fn load(&mut self, model_name: &str) -> Result<Self::Model, LateralError>;
}

// ============================================================================
// Vision-document embedding
// ============================================================================

/// A loaded vision model producing multi-vector embeddings.
///
/// Output contract: every returned embedding has L2-normalized rows sharing
/// one dimension. The numerics behind feature extraction are the
/// collaborator's business.
pub trait VisionModel {
    /// Multi-vector embedding of a retrieval query.
    fn embed_query(&mut self, text: &str) -> Result<MultiVectorEmbedding, LateralError>;

    /// Multi-vector embedding of one page image on disk.
    fn embed_image(&mut self, path: &str) -> Result<MultiVectorEmbedding, LateralError>;
}

/// Loader for vision-document embedding models.
pub trait VisionBackend {
    type Model: VisionModel;

    fn load(&mut self, model_name: &str) -> Result<Self::Model, LateralError>;
}

// ============================================================================
// Download
// ============================================================================

/// One download request handed to the collaborator.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub repo_id: String,
    pub local_dir: PathBuf,
    pub revision: String,
    pub allow_patterns: Option<Vec<String>>,
    pub ignore_patterns: Option<Vec<String>>,
}

/// Byte/file counters reported by the collaborator while downloading.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadUpdate {
    pub downloaded: u64,
    pub total: u64,
    pub downloaded_files: u32,
    pub total_files: u32,
}

/// Result of a finished download.
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub local_path: PathBuf,
    pub size: u64,
}

/// Downloader collaborator. Blocks for the duration of the transfer and
/// reports progress through the callback; the per-file name travels with the
/// update via `current_file`.
pub trait DownloadBackend {
    fn download(
        &mut self,
        request: &DownloadRequest,
        on_progress: &mut dyn FnMut(&str, DownloadUpdate),
    ) -> Result<DownloadSummary, LateralError>;
}

// ============================================================================
// Deterministic stubs
// ============================================================================

fn seed_from(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Hash-seeded pseudo-random values in [-1, 1], reproducible per input.
fn seeded_values(seed: u64, count: usize) -> Vec<f32> {
    let mut state = seed | 1;
    (0..count)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
        })
        .collect()
}

/// Stub generation backend: deterministic word-by-word echo completions.
///
/// `failing` builds a backend whose loads are rejected, for exercising the
/// load-failure path.
#[derive(Debug, Default)]
pub struct StubGenerationBackend {
    fail_with: Option<String>,
}

impl StubGenerationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
        }
    }
}

impl GenerationBackend for StubGenerationBackend {
    type Model = StubGenerationModel;

    fn load(
        &mut self,
        model_path: &str,
        _adapter_path: Option<&str>,
    ) -> Result<Self::Model, LateralError> {
        if let Some(msg) = &self.fail_with {
            return Err(LateralError::load_failure(msg.clone()));
        }
        Ok(StubGenerationModel {
            model_path: model_path.to_string(),
        })
    }
}

/// Model half of [`StubGenerationBackend`].
#[derive(Debug)]
pub struct StubGenerationModel {
    model_path: String,
}

impl GenerationModel for StubGenerationModel {
    fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Box<dyn ChunkStream + '_>, LateralError> {
        let completion = format!(
            "[{}] completion for: {}",
            self.model_path,
            prompt.split_whitespace().take(8).collect::<Vec<_>>().join(" ")
        );
        let words: Vec<String> = completion
            .split_whitespace()
            .take(params.max_tokens as usize)
            .map(str::to_string)
            .collect();
        Ok(Box::new(StubChunkStream {
            words,
            accumulated: String::new(),
            next: 0,
        }))
    }
}

struct StubChunkStream {
    words: Vec<String>,
    accumulated: String,
    next: usize,
}

impl ChunkStream for StubChunkStream {
    fn next_chunk(&mut self) -> Result<Option<String>, LateralError> {
        if self.next >= self.words.len() {
            return Ok(None);
        }
        if !self.accumulated.is_empty() {
            self.accumulated.push(' ');
        }
        self.accumulated.push_str(&self.words[self.next]);
        self.next += 1;
        Ok(Some(self.accumulated.clone()))
    }
}

/// Stub embedding backend: hash-seeded unit vectors, no model files needed.
#[derive(Debug)]
pub struct StubEmbeddingBackend {
    dimensions: usize,
    fail_with: Option<String>,
}

impl StubEmbeddingBackend {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fail_with: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            dimensions: 0,
            fail_with: Some(message.into()),
        }
    }
}

impl Default for StubEmbeddingBackend {
    fn default() -> Self {
        Self::new(768)
    }
}

impl EmbeddingBackend for StubEmbeddingBackend {
    type Model = StubEmbeddingModel;

    fn load(&mut self, model_name: &str) -> Result<Self::Model, LateralError> {
        if let Some(msg) = &self.fail_with {
            return Err(LateralError::load_failure(msg.clone()));
        }
        Ok(StubEmbeddingModel {
            model_name: model_name.to_string(),
            dimensions: self.dimensions,
        })
    }
}

/// Model half of [`StubEmbeddingBackend`].
#[derive(Debug)]
pub struct StubEmbeddingModel {
    model_name: String,
    dimensions: usize,
}

impl EmbeddingModel for StubEmbeddingModel {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f64>>, LateralError> {
        Ok(texts
            .iter()
            .map(|text| {
                let seed = seed_from(&format!("{}::{}", self.model_name, text));
                let mut row: Vec<f64> = seeded_values(seed, self.dimensions)
                    .into_iter()
                    .map(f64::from)
                    .collect();
                let norm: f64 = row.iter().map(|x| x * x).sum::<f64>().sqrt() + 1e-8;
                for x in &mut row {
                    *x /= norm;
                }
                row
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Stub vision backend: hash-seeded multi-vector embeddings.
///
/// Placeholder numerics; only the shape and normalization contract matter.
#[derive(Debug)]
pub struct StubVisionBackend {
    dimension: usize,
    rows_per_input: usize,
}

impl StubVisionBackend {
    pub fn new(dimension: usize, rows_per_input: usize) -> Self {
        Self {
            dimension,
            rows_per_input,
        }
    }
}

impl Default for StubVisionBackend {
    fn default() -> Self {
        // ColPali-like shape: 128-dim patch vectors
        Self::new(128, 32)
    }
}

impl VisionBackend for StubVisionBackend {
    type Model = StubVisionModel;

    fn load(&mut self, model_name: &str) -> Result<Self::Model, LateralError> {
        Ok(StubVisionModel {
            model_name: model_name.to_string(),
            dimension: self.dimension,
            rows_per_input: self.rows_per_input,
        })
    }
}

/// Model half of [`StubVisionBackend`].
#[derive(Debug)]
pub struct StubVisionModel {
    model_name: String,
    dimension: usize,
    rows_per_input: usize,
}

impl StubVisionModel {
    fn embed_input(&self, kind: &str, input: &str) -> Result<MultiVectorEmbedding, LateralError> {
        let seed = seed_from(&format!("{}::{}::{}", self.model_name, kind, input));
        let data = seeded_values(seed, self.rows_per_input * self.dimension);
        let mut mv = MultiVectorEmbedding::new(data, self.dimension)?;
        mv.normalize();
        Ok(mv)
    }
}

impl VisionModel for StubVisionModel {
    fn embed_query(&mut self, text: &str) -> Result<MultiVectorEmbedding, LateralError> {
        self.embed_input("query", text)
    }

    fn embed_image(&mut self, path: &str) -> Result<MultiVectorEmbedding, LateralError> {
        self.embed_input("image", path)
    }
}

/// Stub downloader: materializes a model directory with a `config.json` and
/// reports progress in fixed-size steps.
#[derive(Debug)]
pub struct StubDownloadBackend {
    pub total_bytes: u64,
    pub steps: u32,
    fail_with: Option<String>,
}

impl StubDownloadBackend {
    pub fn new(total_bytes: u64, steps: u32) -> Self {
        Self {
            total_bytes,
            steps: steps.max(1),
            fail_with: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            total_bytes: 0,
            steps: 1,
            fail_with: Some(message.into()),
        }
    }
}

impl Default for StubDownloadBackend {
    fn default() -> Self {
        Self::new(1024 * 1024, 20)
    }
}

impl DownloadBackend for StubDownloadBackend {
    fn download(
        &mut self,
        request: &DownloadRequest,
        on_progress: &mut dyn FnMut(&str, DownloadUpdate),
    ) -> Result<DownloadSummary, LateralError> {
        if let Some(msg) = &self.fail_with {
            return Err(LateralError::backend(msg.clone()));
        }

        let file_name = "model.safetensors";
        for step in 1..=self.steps {
            let downloaded = self.total_bytes * u64::from(step) / u64::from(self.steps);
            on_progress(
                file_name,
                DownloadUpdate {
                    downloaded,
                    total: self.total_bytes,
                    downloaded_files: u32::from(step == self.steps),
                    total_files: 1,
                },
            );
        }

        std::fs::create_dir_all(&request.local_dir)?;
        let config = serde_json::json!({ "_name_or_path": request.repo_id });
        std::fs::write(
            request.local_dir.join("config.json"),
            serde_json::to_vec_pretty(&config).map_err(|e| LateralError::backend(e.to_string()))?,
        )?;

        Ok(DownloadSummary {
            local_path: request.local_dir.clone(),
            size: self.total_bytes,
        })
    }
}
