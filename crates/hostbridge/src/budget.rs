//! Size caps for text handed back to a chat

/// Appended whenever text is cut
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Rough bytes-per-token used to turn a token budget into bytes
const BYTES_PER_TOKEN: u64 = 4;

/// Cut `text` to fit both the byte cap and the token budget.
///
/// Returns the (possibly shortened) text and whether anything was dropped.
pub fn cap_text(text: &str, max_bytes: usize, max_tokens: u64) -> (String, bool) {
    let token_bytes = max_tokens.saturating_mul(BYTES_PER_TOKEN);
    let limit = usize::try_from(token_bytes).unwrap_or(usize::MAX).min(max_bytes);

    if text.len() <= limit {
        return (text.to_string(), false);
    }

    let mut cut = limit;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut out = String::with_capacity(cut + TRUNCATION_MARKER.len());
    out.push_str(&text[..cut]);
    out.push_str(TRUNCATION_MARKER);
    (out, true)
}
