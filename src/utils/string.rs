//! UTF-8 safe string truncation helpers.
//!
//! Tool outputs and transcript entries are trimmed by character count, never
//! by byte index, which can panic on multibyte characters.

/// Return the first `n` characters of `s` as a `String` (no ellipsis).
pub fn prefix_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Truncate `s` to at most `n` characters, appending a marker when trimmed.
pub fn truncate_chars(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    let mut out = prefix_chars(s, n);
    out.push_str("...");
    out
}

/// Truncate `s` to at most `n` characters with an explicit `[truncated]`
/// marker, used for tool output ceilings where the model should know content
/// was cut.
pub fn truncate_output(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    let mut out = prefix_chars(s, n);
    out.push_str("\n... [truncated]");
    out
}
