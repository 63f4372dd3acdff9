//! Plain-text helpers used by the summary pipeline: markup stripping, word
//! truncation and the final storage/display sanitizer.

use once_cell::sync::Lazy;
use regex::Regex;

/// Appended to a summary when words were cut.
pub const ELLIPSIS: char = '\u{2026}';

// Script and style bodies are dropped with their tags, not kept as text.
static SCRIPT_STYLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script[^>]*?>.*?</script\s*>|<style[^>]*?>.*?</style\s*>")
        .expect("static regex compile")
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex compile"));

static PERCENT_OCTET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)%[a-f0-9]{2}").expect("static regex compile"));

/// Remove every markup tag from `raw`, returning trimmed plain text.
///
/// Entities are left encoded, so the function is idempotent: once no `<...>`
/// sequence remains a second pass has nothing left to remove.
pub fn normalize(raw: &str) -> String {
    let without_blocks = SCRIPT_STYLE_RE.replace_all(raw, "");
    let without_tags = TAG_RE.replace_all(&without_blocks, "");
    without_tags.trim().to_string()
}

/// Keep the first `max_words` whitespace-delimited words of `text`.
///
/// Text that already fits is returned untouched. Otherwise the kept words are
/// joined by single spaces and followed by [`ELLIPSIS`].
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let mut words = text.split_whitespace();
    let kept: Vec<&str> = words.by_ref().take(max_words).collect();
    if words.next().is_none() {
        return text.to_string();
    }

    let mut truncated = kept.join(" ");
    truncated.push(ELLIPSIS);
    truncated
}

/// Make a single-line value safe to store and display as plain text.
///
/// Residual tags are removed, control characters dropped (line breaks and tabs
/// become spaces), percent-encoded octets stripped and whitespace collapsed.
pub fn sanitize_text(value: &str) -> String {
    let without_tags = TAG_RE.replace_all(value, "");

    let printable: String = without_tags
        .chars()
        .filter_map(|c| match c {
            '\n' | '\r' | '\t' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();

    // Removing one octet can expose another ("%%4141").
    let mut stripped = printable;
    while PERCENT_OCTET_RE.is_match(&stripped) {
        stripped = PERCENT_OCTET_RE.replace_all(&stripped, "").into_owned();
    }

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Filter a content body down to safe markup: scripts, styles, event handlers
/// and `javascript:` links are removed, ordinary formatting is kept.
pub fn filter_markup(html: &str) -> String {
    ammonia::clean(html)
}
