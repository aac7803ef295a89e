//! Document segmentation
//!
//! Splits raw text into the sentence-level units that get embedded and
//! clustered. Each segment keeps the line it came from so the client can
//! jump back to the source.

use serde::{Deserialize, Serialize};

/// A unit of input text carried through the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Dense index (0..N) used by clusters and node provenance
    pub index: usize,
    /// Line number (or list position) in the original input
    pub position: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SegmentOptions {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            min_chars: 10,
            max_chars: 2000,
        }
    }
}

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '؟', '。', '！', '？'];

/// Collapse whitespace runs and drop control characters
pub fn clean_text(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split into sentences on terminal punctuation, keeping the terminator
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if SENTENCE_TERMINATORS.contains(&c) {
            let sentence = clean_text(&current);
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }

    let rest = clean_text(&current);
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Split a run-on sentence at word boundaries into pieces of at most `max_chars`
fn chunk_words(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_len > 0 && current_len + 1 + word_len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split a document into segments: one per line, with over-long lines broken
/// into sentences. Pieces shorter than `min_chars` are dropped.
pub fn split_document(text: &str, options: &SegmentOptions) -> Vec<Segment> {
    let mut segments = Vec::new();

    for (position, line) in text.lines().enumerate() {
        let cleaned = clean_text(line);
        if cleaned.is_empty() {
            continue;
        }

        let pieces = if cleaned.chars().count() > options.max_chars {
            split_sentences(&cleaned)
                .into_iter()
                .flat_map(|s| {
                    if s.chars().count() > options.max_chars {
                        chunk_words(&s, options.max_chars)
                    } else {
                        vec![s]
                    }
                })
                .collect()
        } else {
            vec![cleaned]
        };

        for text in pieces {
            if text.chars().count() >= options.min_chars {
                segments.push(Segment {
                    index: segments.len(),
                    position,
                    text,
                });
            }
        }
    }

    segments
}

/// Wrap caller-segmented texts. Only blank entries are dropped; the original
/// list position is kept as the segment position.
pub fn from_texts<S: AsRef<str>>(texts: &[S]) -> Vec<Segment> {
    texts
        .iter()
        .enumerate()
        .filter_map(|(position, text)| {
            let cleaned = clean_text(text.as_ref());
            (!cleaned.is_empty()).then_some((position, cleaned))
        })
        .enumerate()
        .map(|(index, (position, text))| Segment {
            index,
            position,
            text,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  hello \t\u{0007} world\r\n"), "hello world");
        assert_eq!(clean_text("\u{0000}\u{001F}"), "");
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("First one. Second one! Third? trailing");
        assert_eq!(sentences, vec!["First one.", "Second one!", "Third?", "trailing"]);

        let arabic = split_sentences("ما هو التعلم؟ إنه مجال واسع.");
        assert_eq!(arabic.len(), 2);
    }

    #[test]
    fn test_split_document_filters_short_lines() {
        let doc = "Rust has a strong type system.\n\nok\n   \nCargo builds and tests crates.";
        let segments = split_document(doc, &SegmentOptions::default());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].index, 0);
        assert_eq!(segments[0].position, 0);
        assert_eq!(segments[1].index, 1);
        assert_eq!(segments[1].position, 4);
        assert_eq!(segments[1].text, "Cargo builds and tests crates.");
    }

    #[test]
    fn test_split_document_breaks_long_lines() {
        let options = SegmentOptions {
            min_chars: 5,
            max_chars: 30,
        };
        let doc = "The first sentence is here. The second sentence follows it.";
        let segments = split_document(doc, &options);
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.position == 0));
        assert!(segments.iter().all(|s| s.text.chars().count() <= 30));
    }

    #[test]
    fn test_chunk_words_without_terminators() {
        let chunks = chunk_words("aaaa bbbb cccc dddd", 9);
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc dddd"]);
    }

    #[test]
    fn test_from_texts_keeps_positions() {
        let texts = vec!["alpha", "  ", "gamma delta"];
        let segments = from_texts(&texts);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].index, 1);
        assert_eq!(segments[1].position, 2);
        assert_eq!(segments[1].text, "gamma delta");
    }

    #[test]
    fn test_empty_document() {
        assert!(split_document("", &SegmentOptions::default()).is_empty());
        assert!(split_document("\n\n  \n", &SegmentOptions::default()).is_empty());
    }
}
