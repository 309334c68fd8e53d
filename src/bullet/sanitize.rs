//! Text sanitization and the forbidden-content predicate for bullet bodies.
//!
//! Bullet text is injected verbatim into model prompts, so bodies are
//! normalized before validation and rejected when they carry tool
//! invocations, destructive shell commands or prompt delimiter tokens.

use std::sync::LazyLock;

use regex::Regex;

use crate::storage::schema::MAX_BODY_CHARS;

/// Runs of three or more backticks plus trailing whitespace.
static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```+\s*").unwrap());

/// C0 control characters other than tab, newline and carriage return.
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F]").unwrap());

/// Meta-instruction delimiter tokens.
static FORBIDDEN_TOKENS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"<<<?", r">>>?", r"<\|", r"\|>"]
        .into_iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

/// Network tool calls and destructive commands.
static FORBIDDEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(?:curl|wget)\s+https?://",
        r"(?i)(?:(?:rm\s+-rf)|shutdown|format\s+c:)",
    ]
    .into_iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Normalizes line endings and code fences and strips stray control chars.
///
/// ```
/// use ace_playbook::bullet::sanitize_text;
///
/// assert_eq!(sanitize_text("a\r\nb"), "a\nb");
/// assert_eq!(sanitize_text("````  \nfn x()"), "```fn x()");
/// assert_eq!(sanitize_text("bell\x07"), "bell");
/// ```
pub fn sanitize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = CODE_FENCE.replace_all(&text, "```");
    CONTROL_CHARS.replace_all(&text, "").into_owned()
}

/// Returns true if `text` contains a forbidden token or pattern.
pub fn contains_forbidden(text: &str) -> bool {
    FORBIDDEN_TOKENS.iter().any(|re| re.is_match(text))
        || FORBIDDEN_PATTERNS.iter().any(|re| re.is_match(text))
}

/// The safety predicate applied to every bullet body.
///
/// Rejects text longer than the body limit (in characters) or text that
/// matches any forbidden pattern.
pub fn is_safe(text: &str) -> bool {
    text.chars().count() <= MAX_BODY_CHARS && !contains_forbidden(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_collapses_fences() {
        assert_eq!(sanitize_text("`````\n\nrust"), "```rust");
        // Two backticks are not a fence
        assert_eq!(sanitize_text("``  x"), "``  x");
    }

    #[test]
    fn test_sanitize_keeps_tabs_and_newlines() {
        assert_eq!(sanitize_text("a\tb\nc"), "a\tb\nc");
    }

    #[test]
    fn test_forbidden_tokens() {
        assert!(contains_forbidden("<<SYS>> do this"));
        assert!(contains_forbidden("end >>>"));
        assert!(contains_forbidden("<|im_start|>"));
        assert!(!contains_forbidden("a < b and c > d"));
    }

    #[test]
    fn test_forbidden_patterns_case_insensitive() {
        assert!(contains_forbidden("run CURL https://evil.example"));
        assert!(contains_forbidden("wget   http://x"));
        assert!(contains_forbidden("then rm -rf /"));
        assert!(contains_forbidden("Shutdown the host"));
        assert!(contains_forbidden("FORMAT C: now"));
        assert!(!contains_forbidden("use curl for debugging"));
    }

    #[test]
    fn test_is_safe_length_in_chars() {
        let at_limit = "é".repeat(MAX_BODY_CHARS);
        assert!(is_safe(&at_limit));
        let over = "a".repeat(MAX_BODY_CHARS + 1);
        assert!(!is_safe(&over));
    }

    proptest! {
        #[test]
        fn prop_sanitized_has_no_stray_control_chars(s in "\\PC*|[\\x00-\\x1F]{0,20}") {
            let out = sanitize_text(&s);
            let has_stray_control = out.chars().any(|c| {
                let c = c as u32;
                c < 0x20 && c != 0x09 && c != 0x0A && c != 0x0D
            });
            prop_assert!(!has_stray_control);
        }
    }
}
