use regex::Regex;
use std::sync::OnceLock;

pub const CHATBOT_HANDLE: &str = "@PolyXBot";

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // ASCII word boundaries: a non-ASCII letter next to the handle counts as
    // a boundary, so "请问polyx" matches. `\b` before an optional `@` still
    // requires a word character ahead of it, so "@polyx" matches via "polyx".
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?-u:\b)@?polyx(?-u:\b)").expect("static mention pattern")
    })
}

/// Whether a post or comment addresses the bot.
///
/// Three independent checks are OR-ed: the word-bounded `polyx` handle,
/// and the plain substrings `@polyxbot` / `polyxbot`. The substring checks
/// ignore word boundaries.
pub fn is_mentioned(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    word_pattern().is_match(text) || lower.contains("@polyxbot") || lower.contains("polyxbot")
}
