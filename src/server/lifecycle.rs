//! Model lifecycle state machine.
//!
//! Each sidecar owns exactly one [`LifecycleManager`], which owns the single
//! model binding for the life of the process. Loads are always explicit; a
//! repeated load of the same identifier is a no-op success.

use tracing::info;

use crate::error::LateralError;

/// Identity of the currently loaded model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBinding {
    pub model_path: String,
    pub adapter_path: Option<String>,
}

impl ModelBinding {
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            adapter_path: None,
        }
    }

    pub fn with_adapter(mut self, adapter_path: Option<String>) -> Self {
        self.adapter_path = adapter_path;
        self
    }
}

/// Lifecycle states. `Loading` is transient: the manager can never be
/// observed stuck in it, since loads run synchronously and failure reverts
/// to `Unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Loaded,
}

/// Outcome of a successful load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The collaborator was invoked and a new binding recorded.
    Loaded,
    /// Same identifier already loaded; the collaborator was not invoked.
    AlreadyLoaded,
}

/// Owns the loaded/unloaded state of one model binding plus the
/// collaborator handle `M` that goes with it.
///
/// Dropping the handle in [`LifecycleManager::unload`] is the single release
/// point for collaborator resources; every exit path that unloads frees them.
#[derive(Debug)]
pub struct LifecycleManager<M> {
    state: LifecycleState,
    binding: Option<ModelBinding>,
    model: Option<M>,
}

impl<M> Default for LifecycleManager<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> LifecycleManager<M> {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Unloaded,
            binding: None,
            model: None,
        }
    }

    /// Load a model through `loader`.
    ///
    /// Idempotent: when the requested binding matches the loaded one, returns
    /// success without invoking the loader. A differing binding replaces the
    /// current model (old handle dropped before the new load). On loader
    /// failure the manager reverts to `Unloaded` and the collaborator's
    /// message is surfaced verbatim as a load failure.
    pub fn load_with<F>(
        &mut self,
        binding: ModelBinding,
        loader: F,
    ) -> Result<LoadOutcome, LateralError>
    where
        F: FnOnce(&ModelBinding) -> Result<M, LateralError>,
    {
        if self.state == LifecycleState::Loaded && self.binding.as_ref() == Some(&binding) {
            info!(model = %binding.model_path, "model already loaded");
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        // Release any previous binding before loading the replacement.
        self.model = None;
        self.binding = None;
        self.state = LifecycleState::Loading;

        info!(model = %binding.model_path, "loading model");
        match loader(&binding) {
            Ok(model) => {
                self.model = Some(model);
                self.binding = Some(binding);
                self.state = LifecycleState::Loaded;
                Ok(LoadOutcome::Loaded)
            }
            Err(err) => {
                self.state = LifecycleState::Unloaded;
                Err(match err {
                    err @ LateralError::LoadFailure(_) => err,
                    other => LateralError::load_failure(other.to_string()),
                })
            }
        }
    }

    /// Unload the current model, if any. Always succeeds.
    pub fn unload(&mut self) {
        if let Some(binding) = self.binding.take() {
            info!(model = %binding.model_path, "unloading model");
        }
        self.model = None;
        self.state = LifecycleState::Unloaded;
    }

    /// Current state. Pure read.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Identifier of the loaded model, if any. Pure read.
    pub fn loaded_identifier(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.model_path.as_str())
    }

    /// True when a model is loaded and ready. Pure read.
    pub fn ready(&self) -> bool {
        self.state == LifecycleState::Loaded
    }

    /// Mutable access to the loaded model, or `ModelNotLoaded`.
    ///
    /// This is the only gate to the collaborator handle; there is no
    /// implicit load.
    pub fn model_mut(&mut self) -> Result<&mut M, LateralError> {
        self.model.as_mut().ok_or(LateralError::ModelNotLoaded)
    }
}
