//! Fallback tool-call extraction for models without native tool support.
//!
//! Some local models answer a function-calling request with the call
//! rendered as JSON in the message text, often wrapped in a code fence or
//! surrounded by narration. This parser recovers such calls so the agent
//! loop sees them the same way as native ones.

use serde_json::Value;

/// Try to read a `{"tool_name": ..., "arguments": {...}}` (or `name`/
/// `arguments`) object out of free-form model text.
pub fn extract_tool_call(text: &str) -> Option<(String, Value)> {
    let value = extract_json(text)?;
    let map = value.as_object()?;

    let name = map
        .get("tool_name")
        .or_else(|| map.get("name"))
        .and_then(Value::as_str)?
        .to_string();

    let arguments = match map.get("arguments").cloned() {
        Some(Value::Object(args)) => Value::Object(args),
        Some(Value::Null) | None => Value::Object(Default::default()),
        Some(_) => return None,
    };

    Some((name, arguments))
}

fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if trimmed.starts_with("```") {
        let stripped = trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```JSON")
            .trim_start_matches("```");
        if let Some(end) = stripped.rfind("```") {
            if let Ok(value) = serde_json::from_str::<Value>(stripped[..end].trim()) {
                return Some(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Some(value);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_json_call() {
        let (name, args) = extract_tool_call(
            r#"{"tool_name": "read_neo4j_cypher", "arguments": {"query": "MATCH (n) RETURN n"}}"#,
        )
        .expect("call parsed");
        assert_eq!(name, "read_neo4j_cypher");
        assert_eq!(args, json!({"query": "MATCH (n) RETURN n"}));
    }

    #[test]
    fn parses_fenced_call_with_narration() {
        let text = "Sure, I will query the schema now:\n```json\n{\"tool_name\": \"get_neo4j_schema\", \"arguments\": {}}\n```";
        let (name, args) = extract_tool_call(text).expect("call parsed");
        assert_eq!(name, "get_neo4j_schema");
        assert_eq!(args, json!({}));
    }

    #[test]
    fn accepts_name_field_and_missing_arguments() {
        let (name, args) =
            extract_tool_call(r#"{"name": "get_neo4j_schema"}"#).expect("call parsed");
        assert_eq!(name, "get_neo4j_schema");
        assert_eq!(args, json!({}));
    }

    #[test]
    fn plain_text_is_not_a_call() {
        assert!(extract_tool_call("The graph has 3 labels.").is_none());
        assert!(extract_tool_call("{\"answer\": 42}").is_none());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        assert!(extract_tool_call(r#"{"tool_name": "t", "arguments": "query"}"#).is_none());
    }
}
