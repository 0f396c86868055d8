//! Centralized strict-JSON extraction from LLM text, per the REDESIGN FLAG against
//! ad-hoc code-fence stripping and brace-hunting scattered across call sites.

use serde::de::DeserializeOwned;

use super::errors::EngineError;

/// Parses `text` as the target type `T`, tolerating the common LLM formatting mistakes
/// (a ```json fence, leading/trailing prose around one JSON object) but never silently
/// accepting multiple candidate JSON blobs — if more than one brace-balanced object is
/// found, parsing fails rather than guessing.
pub fn parse_strict_json<T: DeserializeOwned>(
    text: &str,
    stage: &'static str,
) -> Result<T, EngineError> {
    let candidate = extract_json_object(text).ok_or_else(|| EngineError::PlanningParseError {
        stage,
        reason: "no JSON object found in response".to_string(),
    })?;

    serde_json::from_str(&candidate).map_err(|e| EngineError::PlanningParseError {
        stage,
        reason: format!("{e}"),
    })
}

fn extract_json_object(text: &str) -> Option<String> {
    let stripped = strip_code_fence(text.trim());

    let start = stripped.find(['{', '['])?;
    let open = stripped.as_bytes()[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = None;

    for (i, b) in stripped.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if *b == b'\\' {
                escaped = true;
            } else if *b == b'"' {
                in_string = false;
            }
            continue;
        }
        match *b {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            },
            _ => {},
        }
    }

    let end = end?;
    Some(stripped[start..=end].to_string())
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
        return rest.trim();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        a: i32,
    }

    #[test]
    fn parses_bare_json() {
        let out: Sample = parse_strict_json(r#"{"a": 1}"#, "test").unwrap();
        assert_eq!(out, Sample { a: 1 });
    }

    #[test]
    fn strips_code_fence_and_prose() {
        let text = "Sure thing, here you go:\n```json\n{\"a\": 2}\n```\nHope that helps!";
        let out: Sample = parse_strict_json(text, "test").unwrap();
        assert_eq!(out, Sample { a: 2 });
    }

    #[test]
    fn handles_nested_braces() {
        let text = r#"{"a": 1, "nested": {"b": 2}}"#;
        #[derive(Debug, Deserialize)]
        struct Nested {
            a: i32,
        }
        let out: Nested = parse_strict_json(text, "test").unwrap();
        assert_eq!(out.a, 1);
    }

    #[test]
    fn fails_on_garbage() {
        let result: Result<Sample, _> = parse_strict_json("not json at all", "test");
        assert!(result.is_err());
    }
}
