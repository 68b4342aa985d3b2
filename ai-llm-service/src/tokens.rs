//! Approximate token accounting.
//!
//! Chunking and prompt budgeting only need an estimate, so tokens are
//! approximated at four characters each (rounded up). The estimate is
//! deliberately pessimistic for short strings: an empty input still counts
//! as one token because providers bill the sanitised single-space stand-in.

/// Approximate token count for a text.
pub fn count_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4).max(1)
}

/// Truncates `text` so that its estimate stays within `max_tokens`.
///
/// Cuts on a char boundary; returns the input untouched when it already fits.
pub fn truncate_to_tokens(text: &str, max_tokens: u32) -> &str {
    let max_chars = (max_tokens as usize).saturating_mul(4);
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_chars_per_token_rounded_up() {
        assert_eq!(count_tokens("abcd"), 1);
        assert_eq!(count_tokens("abcde"), 2);
        assert_eq!(count_tokens(""), 1);
    }

    #[test]
    fn truncation_respects_budget() {
        let text = "x".repeat(100);
        let cut = truncate_to_tokens(&text, 5);
        assert_eq!(cut.len(), 20);
        assert!(count_tokens(cut) <= 5);
    }

    #[test]
    fn short_text_untouched() {
        assert_eq!(truncate_to_tokens("hello", 10), "hello");
    }
}
