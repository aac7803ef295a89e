//! HTTP API for the web client
//!
//! - POST /api/v1/generate-mindmap   - JSON document or segments -> mind map
//! - POST /api/v1/generate-from-file - multipart upload -> mind map
//! - POST /api/v1/preprocess-file    - multipart upload -> extracted text
//! - GET  /health                    - provider status and token usage
//!
//! Errors are returned as `{success: false, error, detail}`.

use axum::{
    extract::{multipart::Multipart, rejection::JsonRejection, DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use crate::ai_client::TokenUsage;
use crate::error::Error;
use crate::loader;
use crate::pipeline::{MindmapBuilder, MindmapRequest, MindmapResponse};
use crate::settings::ServerSettings;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Room for multipart framing on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

// ============================================================================
// AppState
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub builder: Arc<MindmapBuilder>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(builder: Arc<MindmapBuilder>) -> Self {
        Self {
            builder,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: String,
    detail: String,
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    success: bool,
    error: &'a str,
    detail: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: &self.error,
            detail: &self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        if e.is_client_error() {
            warn!("Rejected request: {}", e);
            bad_request(e.to_string())
        } else {
            error!("Request failed: {}", e);
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: "Mind map generation failed".to_string(),
                detail: e.to_string(),
            }
        }
    }
}

fn bad_request(detail: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        error: "Invalid request".to_string(),
        detail: detail.into(),
    }
}

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Serialize)]
struct FilePreprocessResponse {
    success: bool,
    filename: String,
    processed_text: String,
    text_length: usize,
    detected_language: String,
}

#[derive(Serialize)]
struct ServiceStatus {
    embedding: String,
    llm: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    services: ServiceStatus,
    usage: TokenUsage,
    uptime_secs: u64,
}

/// A multipart upload: the `file` part plus any plain form fields
struct Upload {
    filename: String,
    bytes: Vec<u8>,
    fields: HashMap<String, String>,
}

impl Upload {
    fn field<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, AppError> {
        match self.fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| bad_request(format!("invalid value for '{}': {}", name, raw))),
        }
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| bad_request("file part has no filename"))?;
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
            file = Some((filename, bytes.to_vec()));
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| bad_request(format!("failed to read field '{}': {}", name, e)))?;
            fields.insert(name, value);
        }
    }

    let (filename, bytes) = file.ok_or_else(|| bad_request("missing 'file' part"))?;
    Ok(Upload {
        filename,
        bytes,
        fields,
    })
}

/// Extract on the blocking pool; PDF parsing is CPU-bound
async fn extract(state: &AppState, upload: &Upload) -> Result<String, AppError> {
    let filename = upload.filename.clone();
    let bytes = upload.bytes.clone();
    let max_bytes = state.builder.settings().server.max_upload_bytes;
    tokio::task::spawn_blocking(move || loader::extract_text(&filename, &bytes, max_bytes))
        .await
        .map_err(|e| AppError::from(Error::Extraction(format!("extraction task failed: {}", e))))?
        .map_err(AppError::from)
}

// ============================================================================
// Handlers
// ============================================================================

// POST /api/v1/generate-mindmap
async fn generate_mindmap_handler(
    State(state): State<AppState>,
    payload: Result<Json<MindmapRequest>, JsonRejection>,
) -> Result<Json<MindmapResponse>, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    let response = state.builder.build(request).await?;
    Ok(Json(response))
}

// POST /api/v1/generate-from-file
async fn generate_from_file_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<MindmapResponse>, AppError> {
    let upload = read_upload(multipart).await?;
    info!("[POST /generate-from-file] {} ({} bytes)", upload.filename, upload.bytes.len());

    let text = extract(&state, &upload).await?;
    let request = MindmapRequest {
        lang: upload.field("lang")?,
        max_depth: upload.field("max_depth")?,
        min_size: upload.field("min_size")?,
        with_descriptions: upload.field("with_descriptions")?,
        ..MindmapRequest::from_document(text)
    };

    let mut response = state.builder.build(request).await?;
    response.metadata.filename = Some(upload.filename);
    Ok(Json(response))
}

// POST /api/v1/preprocess-file
async fn preprocess_file_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<FilePreprocessResponse>, AppError> {
    let upload = read_upload(multipart).await?;
    let text = extract(&state, &upload).await?;
    let detection = state.builder.detect_language(&text);

    info!(
        "[POST /preprocess-file] {}: {} chars, language {}",
        upload.filename,
        text.chars().count(),
        detection.language
    );

    Ok(Json(FilePreprocessResponse {
        success: true,
        filename: upload.filename,
        text_length: text.chars().count(),
        processed_text: text,
        detected_language: detection.language.code().to_string(),
    }))
}

// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
        services: ServiceStatus {
            embedding: state.builder.embedding_model().to_string(),
            llm: state.builder.llm_model().to_string(),
        },
        usage: state.builder.llm_usage(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Router
// ============================================================================

fn cors_layer(settings: &ServerSettings) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if settings.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = settings
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

pub fn router(state: AppState) -> Router {
    let server = state.builder.settings().server.clone();

    Router::new()
        .route("/api/v1/generate-mindmap", post(generate_mindmap_handler))
        .route("/api/v1/generate-from-file", post(generate_from_file_handler))
        .route("/api/v1/preprocess-file", post(preprocess_file_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server.max_upload_bytes + MULTIPART_OVERHEAD))
        .layer(cors_layer(&server))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedder;
    use crate::settings::Settings;
    use crate::testing::{FailingEmbedder, KeywordEmbedder, ScriptedLlm};
    use serde_json::{json, Value};

    const BOUNDARY: &str = "thoughtflow-test-boundary";

    fn pets_builder(embedder: Arc<dyn Embedder>) -> MindmapBuilder {
        let llm = Arc::new(ScriptedLlm::responding(|prompt| {
            let texts = prompt.split("Texts:").nth(1).unwrap_or("");
            Ok(match (texts.contains("cat"), texts.contains("rocket")) {
                (true, true) => "Pets and Space",
                (true, false) => "Pets",
                _ => "Space",
            }
            .to_string())
        }));
        MindmapBuilder::new(embedder, llm, Arc::new(Settings::default()))
    }

    fn keyword_embedder() -> Arc<dyn Embedder> {
        Arc::new(KeywordEmbedder::new(&[&["cat", "dog"], &["rocket", "orbit"]]))
    }

    async fn spawn(builder: MindmapBuilder) -> String {
        let app = router(AppState::new(Arc::new(builder)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// (name, filename, content)
    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            let disposition = match filename {
                Some(f) => format!("Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\r\n", name, f),
                None => format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name),
            };
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn post_multipart(url: &str, body: Vec<u8>) -> reqwest::Response {
        reqwest::Client::new()
            .post(url)
            .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(body)
            .send()
            .await
            .unwrap()
    }

    const PETS_AND_SPACE: &str = "My cat sleeps on the sofa all day\n\
        The rocket reached orbit after launch\n\
        The dog chases the cat around the garden\n\
        Astronauts train for years before a rocket flight\n\
        A cat purrs when it feels safe\n\
        The orbit of the station decays slowly";

    #[tokio::test]
    async fn test_health() {
        let base = spawn(pets_builder(keyword_embedder())).await;
        let body: Value = reqwest::get(format!("{}/health", base)).await.unwrap().json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["embedding"], "keyword-fake");
        assert_eq!(body["services"]["llm"], "scripted-fake");
        assert_eq!(body["version"], VERSION);
    }

    #[tokio::test]
    async fn test_generate_mindmap() {
        let base = spawn(pets_builder(keyword_embedder())).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/generate-mindmap", base))
            .json(&json!({"document": PETS_AND_SPACE, "lang": "en", "max_depth": 2, "min_size": 2}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["mindmap"]["label"], "Pets and Space");
        assert_eq!(body["mindmap"]["children"][0]["source_segment_indices"], json!([0, 2, 4]));
        assert_eq!(body["metadata"]["language"], "en");
    }

    #[tokio::test]
    async fn test_client_errors_are_400() {
        let base = spawn(pets_builder(keyword_embedder())).await;
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/generate-mindmap", base);

        let response = client
            .post(&url)
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Invalid request");

        let response = client
            .post(&url)
            .json(&json!({"document": PETS_AND_SPACE, "max_depth": 0}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("max_depth"));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_500() {
        let base = spawn(pets_builder(Arc::new(FailingEmbedder))).await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/generate-mindmap", base))
            .json(&json!({"segments": ["one segment here", "another segment"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(body["detail"].as_str().unwrap().contains("embedding"));
    }

    #[tokio::test]
    async fn test_generate_from_file() {
        let base = spawn(pets_builder(keyword_embedder())).await;
        let body = multipart_body(&[
            ("file", Some("notes.txt"), PETS_AND_SPACE.as_bytes()),
            ("lang", None, "en".as_bytes()),
            ("max_depth", None, "2".as_bytes()),
        ]);
        let response = post_multipart(&format!("{}/api/v1/generate-from-file", base), body).await;
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["metadata"]["filename"], "notes.txt");
        assert_eq!(body["metadata"]["max_depth"], 2);
        assert_eq!(body["mindmap"]["children"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_upload_errors() {
        let base = spawn(pets_builder(keyword_embedder())).await;
        let url = format!("{}/api/v1/generate-from-file", base);

        let body = multipart_body(&[("file", Some("slides.pptx"), "whatever".as_bytes())]);
        assert_eq!(post_multipart(&url, body).await.status(), 400);

        let body = multipart_body(&[("lang", None, "en".as_bytes())]);
        assert_eq!(post_multipart(&url, body).await.status(), 400);

        let body = multipart_body(&[("file", Some("a.txt"), "some text here".as_bytes()), ("max_depth", None, "deep".as_bytes())]);
        let response = post_multipart(&url, body).await;
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("max_depth"));
    }

    #[tokio::test]
    async fn test_preprocess_file() {
        let base = spawn(pets_builder(keyword_embedder())).await;
        let json_doc = br#"[{"text": "The quick brown fox jumps over the lazy dog near the river bank"}, "Another sentence about the same lazy dog and the fox"]"#;
        let body = multipart_body(&[("file", Some("doc.json"), &json_doc[..])]);
        let response = post_multipart(&format!("{}/api/v1/preprocess-file", base), body).await;
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["filename"], "doc.json");
        assert_eq!(body["detected_language"], "en");
        let text = body["processed_text"].as_str().unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(body["text_length"], text.chars().count());
    }
}
