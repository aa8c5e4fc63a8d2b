//! Helpers for cleaning JSON out of LLM output.

/// Strip Markdown code-fence markers from a model response.
///
/// Models routinely wrap JSON in ```json ... ``` fences even when asked
/// not to; `json_mode` responses must come back fence-free.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();

    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };

    // Drop an optional language tag on the opening fence line.
    let rest = match rest.split_once('\n') {
        Some((_lang, body)) => body,
        None => rest,
    };

    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim().to_string()
}

/// Extract the first top-level JSON object or array from free-form text.
///
/// Used as a fallback when a model ignores `json_mode` and surrounds the
/// document with prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let open = text.as_bytes()[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_with_language_tag() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(raw), "{\"a\": 1}");
    }

    #[test]
    fn strips_bare_fences() {
        let raw = "```\n[1, 2]\n```";
        assert_eq!(strip_code_fences(raw), "[1, 2]");
    }

    #[test]
    fn passes_through_unfenced_text() {
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn extracts_object_from_prose() {
        let raw = "Sure! Here is the JSON you asked for:\n{\"scenes\": [{\"title\": \"a {b}\"}]}\nHope that helps.";
        assert_eq!(
            extract_json(raw),
            Some("{\"scenes\": [{\"title\": \"a {b}\"}]}")
        );
    }

    #[test]
    fn extracts_array_with_nested_strings() {
        let raw = r#"prefix ["a \" ]", {"k": "}"}] suffix"#;
        assert_eq!(extract_json(raw), Some(r#"["a \" ]", {"k": "}"}]"#));
    }

    #[test]
    fn no_json_returns_none() {
        assert_eq!(extract_json("nothing here"), None);
    }
}
