//! Sidecar entry point.
//!
//! One binary, one subcommand per sidecar. Stdout is reserved for protocol
//! lines; diagnostics go to stderr through `tracing`.

use std::io::{self, BufReader};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use lateral::backend::{
    StubDownloadBackend, StubEmbeddingBackend, StubGenerationBackend, StubVisionBackend,
};
use lateral::server::{
    self, DownloaderServer, EmbeddingServer, LlmServer, VisionServer,
};
use lateral::LateralError;

#[derive(Parser)]
#[command(name = "lateral", version, about = "Model sidecars over line-delimited JSON")]
struct Cli {
    #[command(subcommand)]
    sidecar: Sidecar,
}

#[derive(Subcommand)]
enum Sidecar {
    /// Text generation and chat
    Llm,
    /// Pooled text embeddings
    Embedding {
        /// Output vector length of the stub model
        #[arg(long, default_value_t = 768)]
        dimensions: usize,
    },
    /// Multi-vector document embeddings
    Vision,
    /// Model download, listing, and deletion
    Downloader {
        /// Batch mode: download one repo and exit instead of serving stdin
        #[arg(long, value_name = "REPO_ID")]
        download: Option<String>,
        /// Target directory for batch mode
        #[arg(long, value_name = "DIR")]
        local_dir: Option<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match serve(cli.sidecar) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "sidecar exited with error");
            ExitCode::FAILURE
        }
    }
}

fn serve(sidecar: Sidecar) -> Result<(), LateralError> {
    let stdin = BufReader::new(io::stdin().lock());
    let stdout = io::stdout().lock();
    match sidecar {
        Sidecar::Llm => server::run(
            &mut LlmServer::new(StubGenerationBackend::new()),
            stdin,
            stdout,
        ),
        Sidecar::Embedding { dimensions } => server::run(
            &mut EmbeddingServer::new(StubEmbeddingBackend::new(dimensions)),
            stdin,
            stdout,
        ),
        Sidecar::Vision => server::run(
            &mut VisionServer::new(StubVisionBackend::default()),
            stdin,
            stdout,
        ),
        Sidecar::Downloader {
            download,
            local_dir,
        } => {
            let mut server = DownloaderServer::new(StubDownloadBackend::default());
            match download {
                Some(repo_id) => server.run_batch(&repo_id, local_dir, stdout),
                None => server::run(&mut server, stdin, stdout),
            }
        }
    }
}
