//! Text-generation sidecar.
//!
//! Serves `ping`, `status`, `load`, `unload`, `generate`, and `chat` over the
//! shared run loop. Generation and chat require an explicitly loaded model;
//! chat history is rendered through the ChatML template before generation.

use std::io::Write;

use crate::backend::{GenerationBackend, GenerationParams};
use crate::error::LateralError;
use crate::server::generation::{render_chat_prompt, run_generation};
use crate::server::lifecycle::{LifecycleManager, ModelBinding};
use crate::server::protocol::{Command, Response};
use crate::server::runloop::{CommandHandler, ResponseWriter};

/// Command handler for the generation sidecar.
pub struct LlmServer<B: GenerationBackend> {
    backend: B,
    lifecycle: LifecycleManager<B::Model>,
}

impl<B: GenerationBackend> LlmServer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            lifecycle: LifecycleManager::new(),
        }
    }

    fn load(
        &mut self,
        model_path: String,
        adapter_path: Option<String>,
    ) -> Result<Response, LateralError> {
        let message = format!("Model loaded: {model_path}");
        let binding = ModelBinding::new(model_path).with_adapter(adapter_path);
        let backend = &mut self.backend;
        self.lifecycle.load_with(binding, |b| {
            backend.load(&b.model_path, b.adapter_path.as_deref())
        })?;
        Ok(Response::ack(message))
    }

    fn generate<W: Write>(
        &mut self,
        prompt: &str,
        params: GenerationParams,
        stream: bool,
        writer: &mut ResponseWriter<W>,
    ) -> Result<Response, LateralError> {
        let model = self.lifecycle.model_mut()?;
        run_generation(model, prompt, &params, stream, writer)
    }
}

impl<B: GenerationBackend> CommandHandler for LlmServer<B> {
    fn handle<W: Write>(
        &mut self,
        command: Command,
        writer: &mut ResponseWriter<W>,
    ) -> Result<Response, LateralError> {
        match command {
            Command::Ping => Ok(Response::pong()),
            Command::Status => Ok(Response::Status {
                model_loaded: self.lifecycle.loaded_identifier().map(str::to_string),
                ready: self.lifecycle.ready(),
            }),
            Command::Load {
                model_path,
                adapter_path,
            } => self.load(model_path, adapter_path),
            Command::Unload => {
                self.lifecycle.unload();
                Ok(Response::ack("Model unloaded"))
            }
            Command::Generate {
                prompt,
                max_tokens,
                temperature,
                top_p,
                stream,
            } => self.generate(
                &prompt,
                GenerationParams {
                    max_tokens,
                    temperature,
                    top_p,
                },
                stream,
                writer,
            ),
            Command::Chat {
                messages,
                max_tokens,
                temperature,
                top_p,
                stream,
            } => {
                let prompt = render_chat_prompt(&messages);
                self.generate(
                    &prompt,
                    GenerationParams {
                        max_tokens,
                        temperature,
                        top_p,
                    },
                    stream,
                    writer,
                )
            }
            other => Err(LateralError::decode(format!(
                "Unsupported command: {}",
                other.name()
            ))),
        }
    }
}
