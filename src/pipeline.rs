//! End-to-end mind map generation
//!
//! segment -> detect language -> embed -> cluster -> label -> assemble
//!
//! [`MindmapBuilder`] owns the long-lived provider handles and is shared by
//! every request. A run either returns a complete tree or an error; a
//! partially labeled tree never leaves this module.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::ai_client::{LlmClient, TokenUsage};
use crate::clustering::{build_cluster_tree, ClusterConfig};
use crate::embeddings::{validate_vectors, Embedder};
use crate::error::{ClusterError, EmbedError, Error, Result};
use crate::labeling::{LabelGenerator, LabelSource};
use crate::language::{Detection, Language, LanguageDetector};
use crate::mindmap::{assemble, MindmapNode};
use crate::segment::{from_texts, split_document, Segment, SegmentOptions};
use crate::settings::Settings;

/// One generation request. Exactly one of `document` or `segments` is used;
/// `segments` wins when both are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MindmapRequest {
    #[serde(default)]
    pub document: Option<String>,
    /// Caller-segmented input, one entry per segment
    #[serde(default)]
    pub segments: Option<Vec<String>>,
    /// Language tag; absent, empty or "auto" means detect
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub min_size: Option<usize>,
    #[serde(default)]
    pub with_descriptions: Option<bool>,
}

impl MindmapRequest {
    pub fn from_document(document: impl Into<String>) -> Self {
        Self {
            document: Some(document.into()),
            ..Default::default()
        }
    }

    pub fn from_segments<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self {
            segments: Some(segments.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MindmapMetadata {
    #[serde(default)]
    pub request_id: String,
    /// Language code, e.g. "ar"
    pub language: String,
    pub language_name: String,
    /// Right-to-left script, for the renderer
    pub rtl: bool,
    /// True when the language came from auto-detection
    pub language_detected: bool,
    pub max_depth: usize,
    pub min_size: usize,
    pub segment_count: usize,
    /// Characters of input text
    pub document_length: usize,
    pub node_count: usize,
    pub depth: usize,
    /// Labels derived from text after the model failed
    pub fallback_labels: usize,
    pub elapsed_ms: u64,
    pub embedding_model: String,
    pub llm_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Segment texts, for click-to-source
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MindmapResponse {
    pub success: bool,
    pub mindmap: MindmapNode,
    pub metadata: MindmapMetadata,
}

/// Validated knobs for one run
#[derive(Debug, Clone, Copy)]
struct RunParams {
    max_depth: usize,
    min_size: usize,
    language: Language,
    language_detected: bool,
    with_descriptions: bool,
}

/// Shared pipeline entry point.
///
/// Construct once at startup with the embedding and language model handles;
/// loading a local embedding model is the expensive part. `build` takes
/// `&self` and may run for many requests at once.
pub struct MindmapBuilder {
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LlmClient>,
    labeler: LabelGenerator,
    detector: LanguageDetector,
    settings: Arc<Settings>,
}

impl MindmapBuilder {
    pub fn new(embedder: Arc<dyn Embedder>, llm: Arc<dyn LlmClient>, settings: Arc<Settings>) -> Self {
        let labeler = LabelGenerator::new(Arc::clone(&llm), settings.labeling.clone(), &settings.llm);
        Self {
            embedder,
            llm,
            labeler,
            detector: LanguageDetector::new(settings.defaults.language),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn llm_model(&self) -> &str {
        self.llm.model_name()
    }

    pub fn llm_usage(&self) -> TokenUsage {
        self.llm.usage()
    }

    pub fn detect_language(&self, text: &str) -> Detection {
        self.detector.detect(text)
    }

    /// Split a document the way `build` does
    pub fn segment(&self, document: &str) -> Vec<Segment> {
        let options = SegmentOptions {
            min_chars: self.settings.limits.min_segment_chars,
            max_chars: self.settings.limits.max_segment_chars,
        };
        split_document(document, &options)
    }

    pub async fn build(&self, request: MindmapRequest) -> Result<MindmapResponse> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "mindmap",
            %request_id,
            lang = request.lang.as_deref().unwrap_or("auto"),
            max_depth = ?request.max_depth,
            min_size = ?request.min_size
        );
        let mut response = self.run(request).instrument(span).await?;
        response.metadata.request_id = request_id;
        Ok(response)
    }

    async fn run(&self, request: MindmapRequest) -> Result<MindmapResponse> {
        let started = Instant::now();

        let (segments, document_length) = match (&request.segments, &request.document) {
            (Some(texts), _) => {
                let length = texts.iter().map(|t| t.chars().count()).sum();
                (from_texts(texts), length)
            }
            (None, Some(document)) => (self.segment(document), document.chars().count()),
            (None, None) => {
                return Err(Error::InvalidInput(
                    "either 'document' or 'segments' is required".to_string(),
                ))
            }
        };

        let params = self.resolve_params(&request, &segments)?;
        info!(
            "Generating mind map: {} segments, language {} ({}), max_depth {}, min_size {}",
            segments.len(),
            params.language,
            if params.language_detected { "detected" } else { "given" },
            params.max_depth,
            params.min_size
        );

        let (mindmap, fallback_labels) = if segments.is_empty() {
            info!("No usable segments, returning placeholder root");
            (MindmapNode::placeholder(params.language), 0)
        } else {
            self.generate(&segments, &params).await?
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Mind map ready: {} nodes, depth {}, {} fallback labels in {}ms",
            mindmap.node_count(),
            mindmap.depth(),
            fallback_labels,
            elapsed_ms
        );

        Ok(MindmapResponse {
            success: true,
            metadata: MindmapMetadata {
                request_id: String::new(),
                language: params.language.code().to_string(),
                language_name: params.language.name().to_string(),
                rtl: params.language.is_rtl(),
                language_detected: params.language_detected,
                max_depth: params.max_depth,
                min_size: params.min_size,
                segment_count: segments.len(),
                document_length,
                node_count: mindmap.node_count(),
                depth: mindmap.depth(),
                fallback_labels,
                elapsed_ms,
                embedding_model: self.embedder.model_name().to_string(),
                llm_model: self.llm.model_name().to_string(),
                filename: None,
                segments,
            },
            mindmap,
        })
    }

    fn resolve_params(&self, request: &MindmapRequest, segments: &[Segment]) -> Result<RunParams> {
        let defaults = &self.settings.defaults;
        let limits = &self.settings.limits;

        let max_depth = request.max_depth.unwrap_or(defaults.max_depth);
        if max_depth < 1 || max_depth > limits.max_depth {
            return Err(Error::InvalidInput(format!(
                "max_depth must be between 1 and {}, got {}",
                limits.max_depth, max_depth
            )));
        }
        let min_size = request.min_size.unwrap_or(defaults.min_size);
        if min_size < 1 || min_size > limits.min_size {
            return Err(Error::InvalidInput(format!(
                "min_size must be between 1 and {}, got {}",
                limits.min_size, min_size
            )));
        }
        if segments.len() > limits.max_segments {
            return Err(Error::InvalidInput(format!(
                "document has {} segments, limit is {}",
                segments.len(),
                limits.max_segments
            )));
        }

        let tag = request
            .lang
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("auto"));
        let (language, language_detected) = match tag {
            Some(tag) => (Language::normalize(tag)?, false),
            None => {
                let text = segments
                    .iter()
                    .map(|s| s.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let detection = self.detector.detect(&text);
                (detection.language, detection.detected)
            }
        };

        Ok(RunParams {
            max_depth,
            min_size,
            language,
            language_detected,
            with_descriptions: request
                .with_descriptions
                .unwrap_or(self.settings.labeling.generate_descriptions),
        })
    }

    /// Embed, cluster, label and assemble. Returns the tree and the number
    /// of fallback labels in it.
    async fn generate(&self, segments: &[Segment], params: &RunParams) -> Result<(MindmapNode, usize)> {
        let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();

        let embed_timeout = self.settings.embedding.timeout_secs;
        let vectors = match timeout(Duration::from_secs(embed_timeout), self.embedder.embed(&texts)).await {
            Ok(result) => result?,
            Err(_) => return Err(EmbedError::Timeout(embed_timeout).into()),
        };
        let dim = validate_vectors(&vectors, texts.len())?;
        info!("Embedded {} segments ({} dims) with {}", texts.len(), dim, self.embedder.model_name());

        let config = ClusterConfig {
            max_depth: params.max_depth,
            min_size: params.min_size,
            min_size_ratio: self.settings.clustering.min_cluster_size_ratio,
            max_branching: self.settings.clustering.max_branching,
            identical_epsilon: self.settings.clustering.identical_epsilon,
        };
        // Quadratic in the segment count, so keep it off the async workers
        let tree = tokio::task::spawn_blocking(move || build_cluster_tree(&vectors, &config))
            .await
            .map_err(|e| ClusterError::Aborted(e.to_string()))??;

        let inputs: Vec<Vec<String>> = tree
            .preorder()
            .iter()
            .map(|cluster| cluster.indices.iter().map(|&i| segments[i].text.clone()).collect())
            .collect();

        // Labels are requested concurrently but collected in pre-order
        let concurrency = self.settings.labeling.concurrency.max(1);
        let labeler = &self.labeler;
        let (language, with_descriptions) = (params.language, params.with_descriptions);
        let labels: Vec<_> = stream::iter(inputs)
            .map(|texts| async move {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                labeler.label_cluster(&refs, language, with_descriptions).await
            })
            .buffered(concurrency)
            .collect()
            .await;

        let fallback_labels = labels
            .iter()
            .filter(|l| l.label.source == LabelSource::Fallback)
            .count();

        let mindmap = assemble(&tree, labels)?;
        Ok((mindmap, fallback_labels))
    }
}
