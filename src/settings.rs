//! Application settings
//!
//! Loaded once at startup from a JSON file and shared read-only for the
//! lifetime of the process. API keys from the environment take precedence
//! over stored ones.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::language::Language;
use crate::prompts::{LabelKind, PromptTemplate};
use crate::utils::mask_secret;

/// Env var pointing at a settings file
pub const SETTINGS_ENV: &str = "THOUGHTFLOW_SETTINGS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    Groq,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

impl LlmBackend {
    pub fn default_model(self) -> &'static str {
        match self {
            LlmBackend::Groq => "qwen/qwen3-32b",
            LlmBackend::OpenAi => "gpt-4o-mini",
            LlmBackend::Anthropic => "claude-haiku-4-5-20251001",
            LlmBackend::Ollama => "qwen2.5:7b",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmBackend::Groq => "https://api.groq.com/openai/v1",
            LlmBackend::OpenAi => "https://api.openai.com/v1",
            LlmBackend::Anthropic => "https://api.anthropic.com/v1",
            LlmBackend::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Env var holding the API key; Ollama runs without one
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            LlmBackend::Groq => Some("GROQ_API_KEY"),
            LlmBackend::OpenAi => Some("OPENAI_API_KEY"),
            LlmBackend::Anthropic => Some("ANTHROPIC_API_KEY"),
            LlmBackend::Ollama => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_backend")]
    pub backend: LlmBackend,
    /// None = backend default
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_backend() -> LlmBackend {
    LlmBackend::Groq
}

fn default_top_p() -> f32 {
    0.95
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_llm_timeout() -> u64 {
    60
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Groq,
            model: None,
            api_key: None,
            base_url: None,
            temperature: 0.0,
            top_p: 0.95,
            max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

impl LlmSettings {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.backend.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.backend.default_base_url())
            .trim_end_matches('/')
    }

    /// Get the API key (checks env var first, then stored setting)
    pub fn api_key(&self) -> Option<String> {
        if let Some(var) = self.backend.api_key_env() {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    return Some(key);
                }
            }
        }
        self.api_key.clone().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Multilingual BERT via candle, weights from Hugging Face Hub
    Local,
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_embedding_backend")]
    pub backend: EmbeddingBackend,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default = "default_openai_embedding_model")]
    pub openai_model: String,
    #[serde(default)]
    pub openai_base_url: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::Local
}

fn default_model_id() -> String {
    "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2".to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_openai_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_batch_size() -> usize {
    16
}

fn default_max_input_tokens() -> usize {
    512
}

fn default_embedding_timeout() -> u64 {
    120
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model_id: default_model_id(),
            revision: default_revision(),
            openai_model: default_openai_embedding_model(),
            openai_base_url: None,
            openai_api_key: None,
            batch_size: 16,
            max_input_tokens: 512,
            timeout_secs: 120,
        }
    }
}

impl EmbeddingSettings {
    pub fn openai_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                return Some(key);
            }
        }
        self.openai_api_key.clone().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringSettings {
    /// Effective min size grows with the cluster: max(min_size, n * ratio)
    #[serde(default = "default_min_cluster_size_ratio")]
    pub min_cluster_size_ratio: f32,
    /// Upper bound on children per node
    #[serde(default = "default_max_branching")]
    pub max_branching: usize,
    /// Vectors closer than this to each other count as identical
    #[serde(default = "default_identical_epsilon")]
    pub identical_epsilon: f32,
}

fn default_min_cluster_size_ratio() -> f32 {
    0.15
}

fn default_max_branching() -> usize {
    4
}

fn default_identical_epsilon() -> f32 {
    1e-6
}

impl Default for ClusteringSettings {
    fn default() -> Self {
        Self {
            min_cluster_size_ratio: 0.15,
            max_branching: 4,
            identical_epsilon: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelingSettings {
    /// Retries after the first attempt (2 = up to 3 model calls per label)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Label requests in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_prompt_segments")]
    pub max_prompt_segments: usize,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default)]
    pub generate_descriptions: bool,
    #[serde(default = "PromptTemplate::topic")]
    pub topic: PromptTemplate,
    #[serde(default = "PromptTemplate::descriptive")]
    pub descriptive: PromptTemplate,
}

fn default_max_retries() -> u32 {
    2
}

fn default_concurrency() -> usize {
    4
}

fn default_max_prompt_segments() -> usize {
    30
}

fn default_max_prompt_chars() -> usize {
    4000
}

impl Default for LabelingSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            concurrency: 4,
            max_prompt_segments: 30,
            max_prompt_chars: 4000,
            generate_descriptions: false,
            topic: PromptTemplate::topic(),
            descriptive: PromptTemplate::descriptive(),
        }
    }
}

impl LabelingSettings {
    pub fn template(&self, kind: LabelKind) -> &PromptTemplate {
        match kind {
            LabelKind::Topic => &self.topic,
            LabelKind::Descriptive => &self.descriptive,
        }
    }
}

/// Request defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultSettings {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    /// Used when auto-detection is inconclusive
    #[serde(default = "default_language")]
    pub language: Language,
}

fn default_max_depth() -> usize {
    3
}

fn default_min_size() -> usize {
    2
}

fn default_language() -> Language {
    Language::English
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_size: 2,
            language: Language::English,
        }
    }
}

/// Upper bounds accepted from requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_depth_limit")]
    pub max_depth: usize,
    #[serde(default = "default_min_size_limit")]
    pub min_size: usize,
    #[serde(default = "default_min_segment_chars")]
    pub min_segment_chars: usize,
    #[serde(default = "default_max_segment_chars")]
    pub max_segment_chars: usize,
    /// Segments per request; clustering is quadratic in this
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
}

fn default_max_depth_limit() -> usize {
    10
}

fn default_min_size_limit() -> usize {
    100
}

fn default_min_segment_chars() -> usize {
    10
}

fn default_max_segment_chars() -> usize {
    2000
}

fn default_max_segments() -> usize {
    2000
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_size: 100,
            min_segment_chars: 10,
            max_segment_chars: 2000,
            max_segments: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            cors_origins: default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub clustering: ClusteringSettings,
    #[serde(default)]
    pub labeling: LabelingSettings,
    #[serde(default)]
    pub defaults: DefaultSettings,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub server: ServerSettings,
    /// Used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            embedding: EmbeddingSettings::default(),
            clustering: ClusteringSettings::default(),
            labeling: LabelingSettings::default(),
            defaults: DefaultSettings::default(),
            limits: Limits::default(),
            server: ServerSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Where settings are read from: explicit path, then $THOUGHTFLOW_SETTINGS,
    /// then the user config directory.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(SETTINGS_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        dirs::config_dir().map(|p| p.join("thoughtflow").join("settings.json"))
    }

    /// Load settings from disk, or defaults when the file does not exist.
    /// A file that exists but does not parse is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let settings = match Self::resolve_path(explicit) {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path)?;
                let settings: Settings = serde_json::from_str(&content).map_err(|e| {
                    Error::Config(format!("Failed to parse {}: {}", path.display(), e))
                })?;
                info!("Loaded settings from {}", path.display());
                settings
            }
            Some(path) => {
                debug!("No settings at {}, using defaults", path.display());
                Settings::default()
            }
            None => Settings::default(),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(msg.to_string()));

        if self.limits.max_depth == 0 || self.limits.min_size == 0 || self.limits.max_segments == 0 {
            return fail("limits.max_depth, limits.min_size and limits.max_segments must be at least 1");
        }
        if self.defaults.max_depth == 0 || self.defaults.max_depth > self.limits.max_depth {
            return fail("defaults.max_depth must be within 1..=limits.max_depth");
        }
        if self.defaults.min_size == 0 || self.defaults.min_size > self.limits.min_size {
            return fail("defaults.min_size must be within 1..=limits.min_size");
        }
        if self.limits.min_segment_chars > self.limits.max_segment_chars {
            return fail("limits.min_segment_chars exceeds limits.max_segment_chars");
        }
        if self.llm.timeout_secs == 0 || self.embedding.timeout_secs == 0 {
            return fail("timeouts must be at least 1 second");
        }
        if self.embedding.batch_size == 0 {
            return fail("embedding.batch_size must be at least 1");
        }
        if self.labeling.concurrency == 0 {
            return fail("labeling.concurrency must be at least 1");
        }
        if self.clustering.max_branching < 2 {
            return fail("clustering.max_branching must be at least 2");
        }
        if !(0.0..1.0).contains(&self.clustering.min_cluster_size_ratio) {
            return fail("clustering.min_cluster_size_ratio must be in [0, 1)");
        }
        for (name, template) in [("topic", &self.labeling.topic), ("descriptive", &self.labeling.descriptive)] {
            if template.max_words == 0 || template.max_words > template.max_response_words {
                return Err(Error::Config(format!(
                    "labeling.{}: max_words must be within 1..=max_response_words",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Copy with API keys masked, for display
    pub fn masked(&self) -> Settings {
        let mut copy = self.clone();
        copy.llm.api_key = self.llm.api_key().map(|k| mask_secret(&k));
        copy.embedding.openai_api_key = self.embedding.openai_api_key().map(|k| mask_secret(&k));
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.llm.backend, LlmBackend::Groq);
        assert_eq!(settings.llm.model(), "qwen/qwen3-32b");
        assert_eq!(settings.labeling.max_retries, 2);
        assert_eq!(settings.defaults.max_depth, 3);
        assert_eq!(settings.server.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{"llm": {"backend": "ollama"}, "defaults": {"language": "ar"}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.llm.backend, LlmBackend::Ollama);
        assert_eq!(settings.llm.model(), "qwen2.5:7b");
        assert_eq!(settings.llm.base_url(), "http://localhost:11434/v1");
        assert_eq!(settings.defaults.language, Language::Arabic);
        assert_eq!(settings.defaults.min_size, 2);
        assert_eq!(settings.labeling.topic, PromptTemplate::topic());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.defaults.max_depth, 3);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.defaults.max_depth = 5;
        settings.labeling.concurrency = 8;
        settings.save(&path).unwrap();

        let loaded = Settings::load(Some(&path)).unwrap();
        assert_eq!(loaded.defaults.max_depth, 5);
        assert_eq!(loaded.labeling.concurrency, 8);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.labeling.concurrency = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.defaults.max_depth = 11;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.labeling.topic.max_words = 60;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.limits.max_segments = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_stored_key_used_without_env() {
        let settings = LlmSettings {
            backend: LlmBackend::Ollama,
            api_key: Some("local-key".to_string()),
            ..Default::default()
        };
        // Ollama has no env var, so the stored key is returned as-is
        assert_eq!(settings.api_key().as_deref(), Some("local-key"));

        let empty = LlmSettings {
            backend: LlmBackend::Ollama,
            api_key: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(empty.api_key(), None);
    }
}
