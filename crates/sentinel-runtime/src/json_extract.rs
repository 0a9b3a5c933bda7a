/// Shared "strip code fences, fall back to first `{` ... last `}`" recipe
/// used by both the planner and validator when pulling a JSON object out of
/// a raw model response.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest).trim())
        .unwrap_or(trimmed);

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&unfenced[start..=end])
}

/// Truncates a string for inclusion in an error message.
pub fn excerpt(s: &str) -> String {
    const MAX: usize = 200;
    if s.len() <= MAX {
        return s.to_string();
    }
    let mut end = MAX;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_fences() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_object(raw), Some("{\"a\": 1}"));
    }

    #[test]
    fn falls_back_to_first_and_last_brace() {
        let raw = "Sure, here you go: {\"a\": 1} hope that helps!";
        assert_eq!(extract_json_object(raw), Some("{\"a\": 1}"));
    }

    #[test]
    fn returns_none_without_braces() {
        assert_eq!(extract_json_object("no braces here"), None);
    }

    #[test]
    fn excerpt_passes_short_strings_through_unchanged() {
        assert_eq!(excerpt("short"), "short");
    }

    #[test]
    fn excerpt_does_not_panic_when_a_multi_byte_char_straddles_the_cutoff() {
        // A 3-byte UTF-8 character ('€') placed so it spans byte offset 200.
        let mut raw = "a".repeat(199);
        raw.push('€');
        raw.push_str(&"b".repeat(50));
        let result = excerpt(&raw);
        assert!(result.ends_with("..."));
        assert!(result.len() < raw.len());
    }
}
