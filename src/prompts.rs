//! Typed prompt templates for cluster labeling
//!
//! Each label kind carries its own template record. A prompt is rendered
//! from the record's named fields plus the cluster's sample texts; nothing
//! is interpolated into free-form template strings.

use serde::{Deserialize, Serialize};

use crate::language::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelKind {
    /// Short topic label shown on the node
    Topic,
    /// Longer summary attached as the node description
    Descriptive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Opening context for the model
    pub preamble: String,
    /// What to produce, in one sentence
    pub instruction: String,
    /// Final line the model should continue from
    pub answer_cue: String,
    /// Word budget for the cleaned output
    pub max_words: usize,
    /// Responses longer than this are rejected outright
    pub max_response_words: usize,
    /// Openers that mark meta-commentary; a response starting with one is rejected
    #[serde(default)]
    pub forbidden_prefixes: Vec<String>,
    /// Harmless echo prefixes removed during cleanup
    #[serde(default)]
    pub strip_prefixes: Vec<String>,
    /// Overrides the provider-wide temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Overrides the provider-wide completion budget
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_forbidden_prefixes() -> Vec<String> {
    [
        "This section",
        "This cluster",
        "This group",
        "These texts",
        "The texts",
        "The following",
        "Here is",
        "Here's",
        "Sure",
        "Certainly",
        "As an AI",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_strip_prefixes() -> Vec<String> {
    ["Label:", "Output:", "Topic:", "Caption:", "Title:", "Description:", "Summary:"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl PromptTemplate {
    pub fn topic() -> Self {
        Self {
            preamble: "You are labeling one branch of a hierarchical mind map. \
                       The texts below were grouped together because they share a topic."
                .to_string(),
            instruction: "Write a short topic label that names what these texts have in common."
                .to_string(),
            answer_cue: "Label:".to_string(),
            max_words: 10,
            max_response_words: 50,
            forbidden_prefixes: default_forbidden_prefixes(),
            strip_prefixes: default_strip_prefixes(),
            temperature: None,
            max_tokens: Some(64),
        }
    }

    pub fn descriptive() -> Self {
        Self {
            preamble: "You are writing the description for one branch of a hierarchical mind map. \
                       The texts below were grouped together because they share a topic."
                .to_string(),
            instruction: "Summarize what these texts say in one or two plain sentences."
                .to_string(),
            answer_cue: "Description:".to_string(),
            max_words: 60,
            max_response_words: 80,
            forbidden_prefixes: default_forbidden_prefixes(),
            strip_prefixes: default_strip_prefixes(),
            temperature: None,
            max_tokens: Some(256),
        }
    }

    pub fn for_kind(kind: LabelKind) -> Self {
        match kind {
            LabelKind::Topic => Self::topic(),
            LabelKind::Descriptive => Self::descriptive(),
        }
    }

    /// Render the prompt for a cluster's sample texts
    pub fn render(&self, language: Language, texts: &[&str]) -> String {
        let mut prompt = String::with_capacity(512 + texts.iter().map(|t| t.len() + 3).sum::<usize>());

        prompt.push_str(&self.preamble);
        prompt.push_str("\n\n");
        prompt.push_str(&self.instruction);
        prompt.push_str("\n\nRules:\n");
        prompt.push_str(&format!("- Answer in {} only.\n", language.name()));
        prompt.push_str(&format!("- Use at most {} words.\n", self.max_words));
        prompt.push_str("- Reply with the answer alone: no explanations, no markdown, no quotes, no tags.\n");
        if !self.forbidden_prefixes.is_empty() {
            let quoted: Vec<String> = self
                .forbidden_prefixes
                .iter()
                .map(|p| format!("\"{}\"", p))
                .collect();
            prompt.push_str(&format!("- Do not start with {}.\n", quoted.join(", ")));
        }

        prompt.push_str("\nTexts:\n");
        for text in texts {
            prompt.push_str("- ");
            prompt.push_str(text);
            prompt.push('\n');
        }

        prompt.push('\n');
        prompt.push_str(&self.answer_cue);
        prompt
    }
}
