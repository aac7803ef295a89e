//! ThoughtFlow Server - HTTP API for mind map generation.
//!
//! Thin axum server around the shared thoughtflow_lib pipeline. The embedding
//! model and LLM client are built once at startup and shared by all requests.
//!
//! Usage:
//!   THOUGHTFLOW_SETTINGS=/path/to/settings.json THOUGHTFLOW_BIND=0.0.0.0:8000 thoughtflow-server
//!
//! Or with args:
//!   thoughtflow-server --settings /path/to/settings.json --bind 127.0.0.1:8000

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use thoughtflow_lib::http_server::{router, AppState};
use thoughtflow_lib::{build_pipeline, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Args {
    settings: Option<PathBuf>,
    bind: Option<String>,
}

// Parse simple args (no clap to keep binary small)
fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        settings: None,
        bind: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--settings" if i + 1 < args.len() => {
                parsed.settings = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--bind" if i + 1 < args.len() => {
                parsed.bind = Some(args[i + 1].clone());
                i += 2;
            }
            "--help" | "-h" => {
                println!("thoughtflow-server - mind map generation HTTP API");
                println!();
                println!("Usage: thoughtflow-server [--settings PATH] [--bind ADDR:PORT]");
                println!();
                println!("Environment variables:");
                println!("  THOUGHTFLOW_SETTINGS  Settings file");
                println!("  THOUGHTFLOW_BIND      Bind address (overrides settings)");
                println!("  RUST_LOG              Log filter (overrides settings.log_level)");
                println!("  GROQ_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY");
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }
    parsed
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = parse_args();

    let settings = Settings::load(args.settings.as_deref()).context("failed to load settings")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .init();

    let bind_addr = args
        .bind
        .or_else(|| std::env::var("THOUGHTFLOW_BIND").ok())
        .unwrap_or_else(|| settings.server.bind.clone());

    info!("[Server] LLM: {:?} / {}", settings.llm.backend, settings.llm.model());
    info!("[Server] Embeddings: {:?}", settings.embedding.backend);

    let settings = Arc::new(settings);
    let builder = build_pipeline(Arc::clone(&settings))
        .await
        .context("failed to initialize pipeline")?;

    let app = router(AppState::new(Arc::new(builder)));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", bind_addr))?;

    info!("[Server] Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("[Server] Stopped");
    Ok(())
}
