//! Label generation for clusters
//!
//! Each label request runs a small bounded state machine:
//!
//! ```text
//! Pending(n) -> Success            -> Done(Accepted)
//!            -> Invalid | Failed   -> Pending(n + 1)   while n < 1 + max_retries
//!                                  -> Done(Exhausted)  otherwise
//! ```
//!
//! Exhausted topic labels fall back to a deterministic label built from the
//! cluster's own text. Labeling never returns an error to the pipeline.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::ai_client::{GenerationParams, LlmClient};
use crate::clustering::{capitalize, extract_keywords};
use crate::error::LlmError;
use crate::language::Language;
use crate::prompts::{LabelKind, PromptTemplate};
use crate::settings::{LabelingSettings, LlmSettings};
use crate::utils::{truncate_chars, truncate_words};
use crate::validation::{clean_response, is_markup_free, validate_response, Rejection};

/// Keywords joined into a fallback label
const FALLBACK_KEYWORDS: usize = 3;
/// Prefix of the first text used when no keywords qualify
const FALLBACK_CHARS: usize = 50;
const FALLBACK_WORDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    pub text: String,
    pub source: LabelSource,
    /// Model calls spent on this label
    pub attempts: u32,
}

/// Everything the assembler needs for one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLabel {
    pub label: Label,
    pub description: Option<String>,
}

enum AttemptState {
    Pending { attempt: u32 },
    Success { text: String, attempt: u32 },
    Invalid { attempt: u32, reason: Rejection },
    Failed { attempt: u32, error: LlmError },
    Done(Outcome),
}

enum Outcome {
    Accepted { text: String, attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Labels clusters through a shared language model client.
///
/// Cheap to share: holds the client by `Arc` and immutable settings.
pub struct LabelGenerator {
    llm: Arc<dyn LlmClient>,
    settings: LabelingSettings,
    params: GenerationParams,
    timeout: Duration,
}

impl LabelGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, settings: LabelingSettings, llm_settings: &LlmSettings) -> Self {
        Self {
            llm,
            settings,
            params: GenerationParams::from(llm_settings),
            timeout: Duration::from_secs(llm_settings.timeout_secs.max(1)),
        }
    }

    pub fn settings(&self) -> &LabelingSettings {
        &self.settings
    }

    /// Label one cluster from its member texts. Always produces a non-empty,
    /// markup-free topic label; the description is `None` unless requested
    /// and accepted.
    pub async fn label_cluster(&self, texts: &[&str], language: Language, with_description: bool) -> ClusterLabel {
        let sample = sample_texts(texts, self.settings.max_prompt_segments, self.settings.max_prompt_chars);

        let topic = self.settings.template(LabelKind::Topic);
        let label = match self.run(topic, language, &sample).await {
            Outcome::Accepted { text, attempts } => Label {
                text,
                source: LabelSource::Model,
                attempts,
            },
            Outcome::Exhausted { attempts } => {
                let text = fallback_label(texts, language, topic);
                debug!("Using fallback label '{}' after {} attempts", text, attempts);
                Label {
                    text,
                    source: LabelSource::Fallback,
                    attempts,
                }
            }
        };

        let description = if with_description {
            let descriptive = self.settings.template(LabelKind::Descriptive);
            match self.run(descriptive, language, &sample).await {
                Outcome::Accepted { text, .. } => Some(text),
                Outcome::Exhausted { attempts } => {
                    debug!("No description after {} attempts", attempts);
                    None
                }
            }
        } else {
            None
        };

        ClusterLabel { label, description }
    }

    async fn run(&self, template: &PromptTemplate, language: Language, texts: &[&str]) -> Outcome {
        let prompt = template.render(language, texts);
        let params = GenerationParams {
            temperature: template.temperature.unwrap_or(self.params.temperature),
            max_tokens: template.max_tokens.unwrap_or(self.params.max_tokens),
            ..self.params
        };
        let max_attempts = self.settings.max_retries + 1;

        let mut state = AttemptState::Pending { attempt: 1 };
        loop {
            state = match state {
                AttemptState::Pending { attempt } => match self.call(&prompt, &params).await {
                    Ok(raw) => match accept(&raw, template, language) {
                        Ok(text) => AttemptState::Success { text, attempt },
                        Err(reason) => AttemptState::Invalid { attempt, reason },
                    },
                    Err(error) => AttemptState::Failed { attempt, error },
                },
                AttemptState::Success { text, attempt } => AttemptState::Done(Outcome::Accepted {
                    text,
                    attempts: attempt,
                }),
                AttemptState::Invalid { attempt, reason } => {
                    warn!(
                        "Rejected {} response (attempt {}/{}): {}",
                        self.llm.model_name(),
                        attempt,
                        max_attempts,
                        reason
                    );
                    next_attempt(attempt, max_attempts)
                }
                AttemptState::Failed { attempt, error } => {
                    warn!(
                        "{} call failed (attempt {}/{}): {}",
                        self.llm.model_name(),
                        attempt,
                        max_attempts,
                        error
                    );
                    next_attempt(attempt, max_attempts)
                }
                AttemptState::Done(outcome) => return outcome,
            };
        }
    }

    async fn call(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        match timeout(self.timeout, self.llm.complete(prompt, params)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout.as_secs())),
        }
    }
}

fn next_attempt(attempt: u32, max_attempts: u32) -> AttemptState {
    if attempt < max_attempts {
        AttemptState::Pending { attempt: attempt + 1 }
    } else {
        AttemptState::Done(Outcome::Exhausted { attempts: attempt })
    }
}

/// Validate, then clean. Cleaning can leave nothing usable, which counts as
/// a rejection too.
fn accept(raw: &str, template: &PromptTemplate, language: Language) -> Result<String, Rejection> {
    validate_response(raw, template, language)?;
    let cleaned = clean_response(raw, template);
    if cleaned.is_empty() {
        return Err(Rejection::Empty);
    }
    if !language.matches_script(&cleaned) {
        return Err(Rejection::MissingScript(language));
    }
    Ok(cleaned)
}

/// Pick texts for the prompt, spread evenly across the cluster, within the
/// segment and character budgets. Always keeps at least one text.
pub fn sample_texts<'a>(texts: &[&'a str], max_segments: usize, max_chars: usize) -> Vec<&'a str> {
    let max_segments = max_segments.max(1);
    let picked: Vec<&str> = if texts.len() <= max_segments {
        texts.to_vec()
    } else {
        (0..max_segments)
            .map(|i| texts[i * texts.len() / max_segments])
            .collect()
    };

    let mut sample = Vec::with_capacity(picked.len());
    let mut used = 0;
    for text in picked {
        let len = text.chars().count();
        if sample.is_empty() {
            sample.push(truncate_chars(text, max_chars.max(1)));
            used += len.min(max_chars);
            continue;
        }
        if used + len > max_chars {
            break;
        }
        sample.push(text);
        used += len;
    }
    sample
}

/// Deterministic label from the cluster's own text: top keywords, else the
/// start of the first text, else the localized "untitled" placeholder. Each
/// candidate goes through the same cleanup as model output and must carry
/// the target script.
pub fn fallback_label(texts: &[&str], language: Language, template: &PromptTemplate) -> String {
    let usable = |candidate: String| -> Option<String> {
        let cleaned = clean_response(&candidate, template);
        (!cleaned.is_empty() && is_markup_free(&cleaned) && language.matches_script(&cleaned))
            .then_some(cleaned)
    };

    let joined = texts.join("\n");
    let keywords: Vec<String> = extract_keywords(&joined, FALLBACK_KEYWORDS)
        .into_iter()
        .map(|(word, _)| capitalize(&word))
        .collect();
    if !keywords.is_empty() {
        if let Some(label) = usable(keywords.join(" ")) {
            return label;
        }
    }

    if let Some(first) = texts.iter().map(|t| t.trim()).find(|t| !t.is_empty()) {
        let head = truncate_chars(first, FALLBACK_CHARS);
        let (mut words, cut) = truncate_words(head, FALLBACK_WORDS);
        if cut || head.len() < first.len() {
            words.push_str("...");
        }
        if let Some(label) = usable(words) {
            return label;
        }
    }

    language.untitled().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;

    fn generator(llm: Arc<ScriptedLlm>) -> LabelGenerator {
        LabelGenerator::new(llm, LabelingSettings::default(), &LlmSettings::default())
    }

    const BAKING: [&str; 3] = [
        "Knead the dough until smooth and elastic",
        "Let the dough rise for an hour in a warm place",
        "Bake the bread dough at high heat",
    ];

    #[tokio::test]
    async fn test_accepts_first_valid_response() {
        let llm = Arc::new(ScriptedLlm::queue(vec![Ok("Bread Baking".to_string())]));
        let result = generator(llm.clone()).label_cluster(&BAKING, Language::English, false).await;
        assert_eq!(result.label.text, "Bread Baking");
        assert_eq!(result.label.source, LabelSource::Model);
        assert_eq!(result.label.attempts, 1);
        assert_eq!(result.description, None);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_contaminated_response_is_retried() {
        let llm = Arc::new(ScriptedLlm::queue(vec![
            Ok("<think>they all mention dough</think>Bread Baking".to_string()),
            Ok("This section is about bread".to_string()),
            Ok("**Label:** Bread Baking".to_string()),
        ]));
        let result = generator(llm.clone()).label_cluster(&BAKING, Language::English, false).await;
        assert_eq!(result.label.text, "Bread Baking");
        assert_eq!(result.label.attempts, 3);
        assert_eq!(llm.calls(), 3);
        assert!(!result.label.text.contains("think"));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let llm = Arc::new(ScriptedLlm::failing());
        let settings = LabelingSettings {
            max_retries: 2,
            ..Default::default()
        };
        let generator = LabelGenerator::new(llm.clone(), settings, &LlmSettings::default());
        let result = generator.label_cluster(&BAKING, Language::English, false).await;
        assert_eq!(llm.calls(), 3);
        assert_eq!(result.label.source, LabelSource::Fallback);
        assert_eq!(result.label.attempts, 3);
    }

    #[tokio::test]
    async fn test_fallback_never_empty_and_markup_free() {
        let llm = Arc::new(ScriptedLlm::responding(|_| Ok("<reasoning>hmm</reasoning>".to_string())));
        let g = generator(llm);

        let result = g.label_cluster(&BAKING, Language::English, false).await;
        assert_eq!(result.label.source, LabelSource::Fallback);
        assert_eq!(result.label.text, "Dough Knead Smooth");
        assert!(is_markup_free(&result.label.text));

        let odd = ["**__##**", "<b></b>"];
        let result = g.label_cluster(&odd, Language::English, false).await;
        assert!(!result.label.text.is_empty());
        assert!(is_markup_free(&result.label.text));
    }

    #[tokio::test]
    async fn test_arabic_label_requires_arabic_script() {
        let llm = Arc::new(ScriptedLlm::queue(vec![
            Ok("Machine Learning".to_string()),
            Ok("تعلم الآلة".to_string()),
        ]));
        let texts = ["الشبكات العصبية تتعلم من البيانات", "خوارزميات التعلم العميق"];
        let result = generator(llm.clone()).label_cluster(&texts, Language::Arabic, false).await;
        assert_eq!(result.label.text, "تعلم الآلة");
        assert_eq!(result.label.attempts, 2);
    }

    #[tokio::test]
    async fn test_arabic_fallback_keeps_script() {
        let llm = Arc::new(ScriptedLlm::responding(|_| Ok("Machine Learning".to_string())));
        let texts = ["الشبكات العصبية تتعلم من البيانات", "الشبكات العميقة"];
        let result = generator(llm).label_cluster(&texts, Language::Arabic, false).await;
        assert_eq!(result.label.source, LabelSource::Fallback);
        assert!(Language::Arabic.matches_script(&result.label.text));

        // Cluster text in the wrong script falls through to the placeholder
        let llm = Arc::new(ScriptedLlm::failing());
        let result = generator(llm).label_cluster(&["plain english"], Language::Arabic, false).await;
        assert_eq!(result.label.text, Language::Arabic.untitled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let llm = Arc::new(ScriptedLlm::responding(|_| Ok("Too Late".to_string())).with_delay(Duration::from_secs(600)));
        let llm_settings = LlmSettings {
            timeout_secs: 5,
            ..Default::default()
        };
        let generator = LabelGenerator::new(llm.clone(), LabelingSettings::default(), &llm_settings);
        let result = generator.label_cluster(&BAKING, Language::English, false).await;
        assert_eq!(result.label.source, LabelSource::Fallback);
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_description_when_requested() {
        let llm = Arc::new(ScriptedLlm::responding(|prompt| {
            if prompt.ends_with("Description:") {
                Ok("Steps for making bread at home.".to_string())
            } else {
                Ok("Bread Baking".to_string())
            }
        }));
        let result = generator(llm).label_cluster(&BAKING, Language::English, true).await;
        assert_eq!(result.label.text, "Bread Baking");
        assert_eq!(result.description.as_deref(), Some("Steps for making bread at home."));
    }

    #[tokio::test]
    async fn test_failed_description_is_none() {
        let llm = Arc::new(ScriptedLlm::responding(|prompt| {
            if prompt.ends_with("Description:") {
                Err(LlmError::Api { status: 503, body: "overloaded".to_string() })
            } else {
                Ok("Bread Baking".to_string())
            }
        }));
        let result = generator(llm).label_cluster(&BAKING, Language::English, true).await;
        assert_eq!(result.label.source, LabelSource::Model);
        assert_eq!(result.description, None);
    }

    #[test]
    fn test_sample_texts_spreads_and_bounds() {
        let texts: Vec<String> = (0..10).map(|i| format!("text {}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let sample = sample_texts(&refs, 5, 1000);
        assert_eq!(sample, vec!["text 0", "text 2", "text 4", "text 6", "text 8"]);

        let sample = sample_texts(&refs, 10, 14);
        assert_eq!(sample, vec!["text 0", "text 1"]);

        let long = "x".repeat(100);
        let sample = sample_texts(&[long.as_str()], 5, 10);
        assert_eq!(sample, vec!["xxxxxxxxxx"]);
    }

    #[test]
    fn test_fallback_from_first_text() {
        let template = PromptTemplate::topic();
        // Only stop words and short tokens: keywords come back empty
        let label = fallback_label(&["it is on to be or not to be at all"], Language::English, &template);
        assert_eq!(label, "it is on to be or not to...");
        assert_eq!(fallback_label(&[], Language::French, &template), Language::French.untitled());
    }
}
