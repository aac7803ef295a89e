//! Label response validation and cleanup
//!
//! [`validate_response`] decides whether a raw model reply may be used at all.
//! [`clean_response`] then normalizes an accepted reply; it runs on every
//! label, including fallbacks, so residual markup never reaches a node.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::language::Language;
use crate::prompts::PromptTemplate;
use crate::utils::{truncate_words, word_count};

/// Characters stripped from labels (markdown emphasis, headings, code, links)
const MARKDOWN_CHARS: &[char] = &['*', '_', '#', '`', '[', ']', '~'];

/// Wrapping quotes models like to add
const QUOTE_CHARS: &[char] = &['"', '\'', '“', '”', '‘', '’', '«', '»', '„'];

const REASONING_TAGS: &str = "think|thinking|reasoning|reflection|scratchpad|analysis";

fn reasoning_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)<\s*/?\s*(?:{})\b[^>]*>", REASONING_TAGS))
            .expect("reasoning tag pattern is valid")
    })
}

/// A reasoning block through its closing tag, or to the end if never closed
fn reasoning_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?is)<\s*(?:{tags})\b[^>]*>.*?(?:<\s*/\s*(?:{tags})\s*>|\z)",
            tags = REASONING_TAGS
        ))
        .expect("reasoning block pattern is valid")
    })
}

fn markup_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?[A-Za-z][^<>]*>").expect("markup tag pattern is valid"))
}

/// Why a model response was not accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    ReasoningTag,
    MarkupTag,
    ForbiddenPrefix(String),
    TooLong { words: usize, max: usize },
    MissingScript(Language),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Empty => write!(f, "empty response"),
            Rejection::ReasoningTag => write!(f, "contains reasoning tags"),
            Rejection::MarkupTag => write!(f, "contains XML/HTML tags"),
            Rejection::ForbiddenPrefix(p) => write!(f, "starts with forbidden prefix '{}'", p),
            Rejection::TooLong { words, max } => write!(f, "too long ({} words, max {})", words, max),
            Rejection::MissingScript(lang) => write!(f, "no {} characters", lang),
        }
    }
}

/// Case-insensitive phrase match at the start of `text`; the phrase must end
/// at a word boundary so "Sure" does not catch "Surety bonds".
fn starts_with_phrase(text: &str, phrase: &str) -> bool {
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return false;
    }
    let n = phrase.chars().count();
    let head: String = text.chars().take(n).collect();
    if head.to_lowercase() != phrase.to_lowercase() {
        return false;
    }
    let last_is_word = phrase.chars().last().map_or(false, char::is_alphanumeric);
    match text.chars().nth(n) {
        Some(next) => !(last_is_word && next.is_alphanumeric()),
        None => true,
    }
}

fn trim_decoration(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || MARKDOWN_CHARS.contains(&c) || QUOTE_CHARS.contains(&c))
}

/// Check a raw model reply against the template's rules and the target language.
pub fn validate_response(raw: &str, template: &PromptTemplate, language: Language) -> Result<(), Rejection> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Rejection::Empty);
    }
    if reasoning_tag_re().is_match(trimmed) {
        return Err(Rejection::ReasoningTag);
    }
    if markup_tag_re().is_match(trimmed) {
        return Err(Rejection::MarkupTag);
    }

    let opener = trim_decoration(trimmed);
    if let Some(prefix) = template
        .forbidden_prefixes
        .iter()
        .find(|p| starts_with_phrase(opener, p))
    {
        return Err(Rejection::ForbiddenPrefix(prefix.clone()));
    }

    let words = word_count(trimmed);
    if words > template.max_response_words {
        return Err(Rejection::TooLong {
            words,
            max: template.max_response_words,
        });
    }

    if !language.matches_script(trimmed) {
        return Err(Rejection::MissingScript(language));
    }
    Ok(())
}

/// Normalize a reply: drop reasoning blocks and tags, echo prefixes, markdown
/// and wrapping quotes; collapse whitespace; cut to the template's word budget
/// with a trailing "..." when truncated. May return an empty string.
pub fn clean_response(raw: &str, template: &PromptTemplate) -> String {
    let without_blocks = reasoning_block_re().replace_all(raw, " ");
    let without_tags = markup_tag_re().replace_all(&without_blocks, " ");

    let mut text = trim_decoration(&without_tags).to_string();
    // Echoes like "Label: Topic: X" come off one layer at a time
    loop {
        let stripped = template
            .strip_prefixes
            .iter()
            .find(|p| starts_with_phrase(&text, p))
            .map(|p| {
                let skip = p.trim().chars().count();
                trim_decoration(&text.chars().skip(skip).collect::<String>()).to_string()
            });
        match stripped {
            Some(rest) => text = rest,
            None => break,
        }
    }

    let plain: String = text.chars().filter(|c| !MARKDOWN_CHARS.contains(c)).collect();
    let plain = trim_decoration(&plain)
        .trim_end_matches(|c: char| matches!(c, ':' | ';' | ','))
        .trim();

    let (mut label, truncated) = truncate_words(plain, template.max_words);
    if truncated {
        label.push_str("...");
    }
    label
}

/// True if the text carries no markdown characters and no tags
pub fn is_markup_free(text: &str) -> bool {
    !text.chars().any(|c| MARKDOWN_CHARS.contains(&c)) && !markup_tag_re().is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> PromptTemplate {
        PromptTemplate::topic()
    }

    #[test]
    fn test_accepts_plain_label() {
        assert_eq!(validate_response("Neural Networks", &topic(), Language::English), Ok(()));
    }

    #[test]
    fn test_rejects_reasoning_tags() {
        let raw = "<think>The texts are about cooking, so...</think>Baking Bread";
        assert_eq!(
            validate_response(raw, &topic(), Language::English),
            Err(Rejection::ReasoningTag)
        );
        assert_eq!(
            validate_response("Answer </THINK> here", &topic(), Language::English),
            Err(Rejection::ReasoningTag)
        );
    }

    #[test]
    fn test_rejects_markup_tags() {
        assert_eq!(
            validate_response("<b>Bold label</b>", &topic(), Language::English),
            Err(Rejection::MarkupTag)
        );
        // Comparison signs are not tags
        assert_eq!(validate_response("Values < 5 and > 2", &topic(), Language::English), Ok(()));
    }

    #[test]
    fn test_rejects_forbidden_prefix() {
        let result = validate_response("This section covers ovens", &topic(), Language::English);
        assert_eq!(result, Err(Rejection::ForbiddenPrefix("This section".to_string())));

        let quoted = validate_response("**Here is** the label", &topic(), Language::English);
        assert!(matches!(quoted, Err(Rejection::ForbiddenPrefix(_))));

        // Word boundary: "Surety" is not "Sure"
        assert_eq!(validate_response("Surety Bonds", &topic(), Language::English), Ok(()));
    }

    #[test]
    fn test_rejects_long_response() {
        let raw = vec!["word"; 51].join(" ");
        assert_eq!(
            validate_response(&raw, &topic(), Language::English),
            Err(Rejection::TooLong { words: 51, max: 50 })
        );
    }

    #[test]
    fn test_rejects_missing_arabic_script() {
        assert_eq!(
            validate_response("Machine Learning", &topic(), Language::Arabic),
            Err(Rejection::MissingScript(Language::Arabic))
        );
        assert_eq!(validate_response("تعلم الآلة", &topic(), Language::Arabic), Ok(()));
    }

    #[test]
    fn test_clean_strips_everything() {
        let raw = "<think>hmm</think> **Label:** `Neural` _Networks_ ";
        assert_eq!(clean_response(raw, &topic()), "Neural Networks");

        let raw = "Topic: \"Bread Baking\"";
        assert_eq!(clean_response(raw, &topic()), "Bread Baking");
    }

    #[test]
    fn test_clean_unclosed_reasoning_block() {
        assert_eq!(clean_response("Ovens <think>and then it rambles", &topic()), "Ovens");
    }

    #[test]
    fn test_clean_truncates_with_ellipsis() {
        let raw = "one two three four five six seven eight nine ten eleven twelve";
        assert_eq!(
            clean_response(raw, &topic()),
            "one two three four five six seven eight nine ten..."
        );
    }

    #[test]
    fn test_clean_can_be_empty() {
        assert_eq!(clean_response("<think>only thoughts</think>", &topic()), "");
        assert_eq!(clean_response("***", &topic()), "");
    }

    #[test]
    fn test_is_markup_free() {
        assert!(is_markup_free("Neural Networks"));
        assert!(!is_markup_free("**Neural**"));
        assert!(!is_markup_free("<i>x</i>"));
    }
}
