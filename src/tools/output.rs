//! Output capping

/// Cut `text` to at most `max_bytes` on a char boundary and say how much
/// was dropped.
pub fn truncate_output(text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let omitted = text.len() - cut;
    let mut out = text;
    out.truncate(cut);
    out.push_str(&format!("\n[output truncated: {omitted} bytes omitted]"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_untouched() {
        assert_eq!(truncate_output("abc".to_string(), 10), "abc");
    }

    #[test]
    fn test_truncation_marker() {
        let out = truncate_output("a".repeat(100), 40);
        assert!(out.starts_with(&"a".repeat(40)));
        assert!(out.ends_with("[output truncated: 60 bytes omitted]"));
    }

    #[test]
    fn test_truncation_respects_utf8() {
        // each 'é' is two bytes; a cut at 3 must back off to 2
        let out = truncate_output("ééé".to_string(), 3);
        assert!(out.starts_with("é\n"));
        assert!(out.contains("4 bytes omitted"));
    }
}
