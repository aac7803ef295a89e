/// Shared utility functions

/// Truncate to the first `max_chars` characters (not bytes)
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Whitespace-separated word count
pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Keep at most `max_words` words, joined by single spaces.
/// Returns the text and whether anything was cut.
pub fn truncate_words(s: &str, max_words: usize) -> (String, bool) {
    let words: Vec<&str> = s.split_whitespace().collect();
    if words.len() <= max_words {
        return (words.join(" "), false);
    }
    (words[..max_words].join(" "), true)
}

/// Mask a secret for display (shows first/last 4 chars)
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
