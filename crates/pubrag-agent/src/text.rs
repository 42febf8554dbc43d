//! Small string helpers shared by the pipeline stages.

/// Truncate at a character boundary at or below `max_bytes`.
pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Rough token estimate: 1 token ≈ 4 chars.
pub(crate) fn estimate_tokens(s: &str) -> usize {
    s.chars().count().div_ceil(4)
}

/// Strip code fences and wrapping quotes a model sometimes adds.
pub(crate) fn unwrap_model_text(s: &str) -> &str {
    let mut t = s.trim();
    if let Some(rest) = t.strip_prefix("```") {
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
        t = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”')] {
        if t.len() >= 2 && t.starts_with(open) && t.ends_with(close) {
            t = t[open.len_utf8()..t.len() - close.len_utf8()].trim();
        }
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_truncate_multibyte() {
        assert_eq!(safe_truncate("héllo", 2), "h");
        assert_eq!(safe_truncate("abc", 10), "abc");
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_unwrap_model_text() {
        assert_eq!(unwrap_model_text("  \"side effects of bevacizumab\" "), "side effects of bevacizumab");
        assert_eq!(unwrap_model_text("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(unwrap_model_text("plain"), "plain");
    }
}
