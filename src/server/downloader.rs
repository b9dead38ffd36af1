//! Model-downloader sidecar.
//!
//! Serves `ping`, `download`, `list`, and `delete`. Downloads stream a
//! `start` line, throttled `progress` lines, and one terminal line. The
//! managed models directory is the only place `delete` may touch; `list`
//! reports every subdirectory holding a `config.json`.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::backend::{DownloadBackend, DownloadRequest};
use crate::config::{models_dir, repo_dir_name};
use crate::error::LateralError;
use crate::server::progress::ProgressReporter;
use crate::server::protocol::{Command, LocalModel, Response};
use crate::server::runloop::{CommandHandler, ResponseWriter};

/// Command handler for the downloader sidecar.
pub struct DownloaderServer<B: DownloadBackend> {
    backend: B,
    models_dir: PathBuf,
}

impl<B: DownloadBackend> DownloaderServer<B> {
    pub fn new(backend: B) -> Self {
        Self::with_models_dir(backend, models_dir())
    }

    pub fn with_models_dir(backend: B, models_dir: PathBuf) -> Self {
        Self {
            backend,
            models_dir,
        }
    }

    fn download<W: Write>(
        &mut self,
        repo_id: String,
        local_dir: Option<String>,
        revision: String,
        allow_patterns: Option<Vec<String>>,
        ignore_patterns: Option<Vec<String>>,
        writer: &mut ResponseWriter<W>,
    ) -> Result<Response, LateralError> {
        let local_dir = local_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| self.models_dir.join(repo_dir_name(&repo_id)));
        let request = DownloadRequest {
            repo_id: repo_id.clone(),
            local_dir: local_dir.clone(),
            revision,
            allow_patterns,
            ignore_patterns,
        };

        let mut reporter = ProgressReporter::new();
        reporter.start(writer, &repo_id, &local_dir.display().to_string())?;

        // The collaborator callback cannot return an error, so the first
        // write failure is parked and re-raised after the transfer.
        let mut write_error: Option<LateralError> = None;
        let outcome = self.backend.download(&request, &mut |file, update| {
            if write_error.is_none() {
                if let Err(e) = reporter.update(writer, file, update) {
                    write_error = Some(e);
                }
            }
        });
        if let Some(e) = write_error {
            return Err(e);
        }

        match outcome {
            Ok(summary) => Ok(reporter.complete(
                &repo_id,
                &summary.local_path.display().to_string(),
                summary.size,
            )),
            Err(e) => Ok(reporter.fail(e.to_string())),
        }
    }

    fn list(&self) -> Result<Response, LateralError> {
        let mut models = Vec::new();
        let entries = match std::fs::read_dir(&self.models_dir) {
            Ok(entries) => entries,
            // missing models dir means no models, not a failure
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Response::Models { models })
            }
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() || !path.join("config.json").is_file() {
                continue;
            }
            models.push(LocalModel {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: path.display().to_string(),
                size: dir_size(&path),
                repo_id: read_repo_id(&path),
            });
        }
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Response::Models { models })
    }

    fn delete(&self, model_path: &str) -> Result<Response, LateralError> {
        let target = Path::new(model_path);
        if !target.exists() {
            return Err(LateralError::InvalidInput(format!(
                "Model not found: {model_path}"
            )));
        }
        // Canonicalize both sides so `..` segments and symlinks cannot
        // escape the managed directory.
        let root = self.models_dir.canonicalize()?;
        let resolved = target.canonicalize()?;
        if !resolved.starts_with(&root) || resolved == root {
            return Err(LateralError::InvalidInput(format!(
                "Refusing to delete outside the models directory: {model_path}"
            )));
        }
        std::fs::remove_dir_all(&resolved)?;
        Ok(Response::ack(format!("Model deleted: {model_path}")))
    }

    /// One-shot batch download used by the CLI `--download` mode: events go
    /// to `output`, and the returned result maps to the process exit code.
    pub fn run_batch<W: Write>(
        &mut self,
        repo_id: &str,
        local_dir: Option<String>,
        output: W,
    ) -> Result<(), LateralError> {
        let mut writer = ResponseWriter::new(output);
        let response = self.download(
            repo_id.to_string(),
            local_dir,
            "main".to_string(),
            None,
            None,
            &mut writer,
        )?;
        let failed = matches!(response, Response::Error { .. });
        writer.write(&response)?;
        if failed {
            return Err(LateralError::backend(format!(
                "download failed for {repo_id}"
            )));
        }
        Ok(())
    }
}

fn read_repo_id(model_dir: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(model_dir.join("config.json")).ok()?;
    let config: serde_json::Value = serde_json::from_str(&raw).ok()?;
    config
        .get("_name_or_path")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        warn!(path = %path.display(), "unreadable directory while sizing");
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                dir_size(&path)
            } else {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            }
        })
        .sum()
}

impl<B: DownloadBackend> CommandHandler for DownloaderServer<B> {
    fn handle<W: Write>(
        &mut self,
        command: Command,
        writer: &mut ResponseWriter<W>,
    ) -> Result<Response, LateralError> {
        match command {
            Command::Ping => Ok(Response::pong()),
            Command::Download {
                repo_id,
                local_dir,
                revision,
                allow_patterns,
                ignore_patterns,
            } => self.download(
                repo_id,
                local_dir,
                revision,
                allow_patterns,
                ignore_patterns,
                writer,
            ),
            Command::List => self.list(),
            Command::Delete { model_path } => self.delete(&model_path),
            other => Err(LateralError::decode(format!(
                "Unsupported command: {}",
                other.name()
            ))),
        }
    }
}
