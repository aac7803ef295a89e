// Library crate shared by the HTTP server and the CLI
pub mod error;
pub mod utils;
pub mod settings;
pub mod language;
pub mod segment;
pub mod similarity;
pub mod clustering;
pub mod prompts;
pub mod validation;
pub mod ai_client;
pub mod embeddings;
pub mod local_embeddings;
pub mod labeling;
pub mod mindmap;
pub mod pipeline;
pub mod loader;
pub mod http_server;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use mindmap::MindmapNode;
pub use pipeline::{MindmapBuilder, MindmapRequest, MindmapResponse};
pub use settings::Settings;

use std::sync::Arc;
use tracing::info;

/// Build the shared pipeline from settings: LLM client, embedding model
/// (downloaded and loaded on first use, which can take a while), builder.
pub async fn build_pipeline(settings: Arc<Settings>) -> Result<MindmapBuilder> {
    let llm = ai_client::from_settings(&settings.llm)
        .map_err(|e| Error::Config(e.to_string()))?;
    info!("Loading embedding model...");
    let embedder = embeddings::from_settings(&settings.embedding).await?;
    info!("Embedding model ready: {}", embedder.model_name());
    Ok(MindmapBuilder::new(embedder, llm, settings))
}
