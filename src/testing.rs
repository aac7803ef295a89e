//! In-process fakes for the provider traits, used by unit tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::ai_client::{GenerationParams, LlmClient};
use crate::embeddings::Embedder;
use crate::error::{EmbedError, LlmError};

/// Embeds a text onto one axis per keyword group: the axis of every group
/// with a keyword in the text gets 1.0. Texts matching no group land on a
/// shared extra axis.
pub struct KeywordEmbedder {
    groups: Vec<Vec<String>>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(groups: &[&[&str]]) -> Self {
        Self {
            groups: groups
                .iter()
                .map(|g| g.iter().map(|k| k.to_lowercase()).collect())
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v = vec![0.0; self.groups.len() + 1];
        for (axis, group) in self.groups.iter().enumerate() {
            if group.iter().any(|k| lower.contains(k.as_str())) {
                v[axis] = 1.0;
            }
        }
        if v.iter().all(|x| *x == 0.0) {
            v[self.groups.len()] = 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-fake"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Always fails
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-fake"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Request("connection refused".to_string()))
    }
}

type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

enum Script {
    /// Replies in order; an exhausted queue answers with an error
    Queue(Mutex<VecDeque<Result<String, LlmError>>>),
    /// Reply computed from the prompt
    Func(Responder),
}

/// Language model double with canned replies and a call log
pub struct ScriptedLlm {
    script: Script,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn queue(replies: Vec<Result<String, LlmError>>) -> Self {
        Self::with_script(Script::Queue(Mutex::new(replies.into())))
    }

    pub fn responding<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self::with_script(Script::Func(Box::new(f)))
    }

    /// Every call fails with a transport error
    pub fn failing() -> Self {
        Self::responding(|_| Err(LlmError::Request("connection reset".to_string())))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering (for timeout tests)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted-fake"
    }

    async fn complete(&self, prompt: &str, _params: &GenerationParams) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Script::Queue(queue) => queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse)),
            Script::Func(f) => f(prompt),
        }
    }
}
