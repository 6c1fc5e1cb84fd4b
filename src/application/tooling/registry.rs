use super::interface::ToolDescriptor;
use crate::config::ToolPolicy;
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("unknown tool requested: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    /// Mutating tools are never invoked without an explicit approval step.
    pub mutating: bool,
}

/// Session-scoped view of the server's tool catalogue.
///
/// Resolves model-issued call names back to invokable tools, renders the
/// function-calling schema the model provider expects, and checks call
/// arguments against each tool's declared input schema before anything
/// reaches the transport.
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new(descriptors: Vec<ToolDescriptor>, policy: &ToolPolicy) -> Self {
        let mut order = Vec::with_capacity(descriptors.len());
        let mut tools = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let mutating = classify_mutating(&descriptor, policy);
            debug!(tool = %descriptor.name, mutating, "Registered tool");
            order.push(descriptor.name.clone());
            tools.insert(
                descriptor.name.to_lowercase(),
                RegisteredTool { descriptor, mutating },
            );
        }
        Self { order, tools }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(&name.to_lowercase()))
            .map(|tool| &tool.descriptor)
    }

    /// Pure transform of the catalogue into the Ollama function-calling
    /// shape. No I/O.
    pub fn provider_schemas(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(&name.to_lowercase()))
            .map(|tool| {
                let parameters = tool
                    .descriptor
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.descriptor.name,
                        "description": tool.descriptor.description.clone().unwrap_or_default(),
                        "parameters": parameters,
                    }
                })
            })
            .collect()
    }

    /// Look up a model-issued tool name. Models occasionally hallucinate
    /// names; the caller turns the miss into a failed result turn.
    pub fn resolve(&self, name: &str) -> Result<&RegisteredTool, DispatchError> {
        self.tools.get(&name.to_lowercase()).ok_or_else(|| {
            warn!(requested_tool = name, "Model requested a tool that does not exist");
            DispatchError::UnknownTool(name.to_string())
        })
    }

    /// Validate call arguments against the tool's input schema: required
    /// properties must be present and top-level property types must match.
    pub fn validate_arguments(&self, name: &str, arguments: &Value) -> Result<(), DispatchError> {
        let tool = self.resolve(name)?;
        let Some(schema) = &tool.descriptor.input_schema else {
            return Ok(());
        };

        let empty = Value::Object(Default::default());
        let supplied = match arguments {
            Value::Null => &empty,
            other => other,
        };
        let Some(supplied) = supplied.as_object() else {
            return Err(self.invalid(name, "arguments must be a JSON object"));
        };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for entry in required.iter().filter_map(Value::as_str) {
                if !supplied.contains_key(entry) {
                    return Err(self.invalid(name, format!("missing required property '{entry}'")));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, value) in supplied {
                let Some(expected) = properties
                    .get(key)
                    .and_then(|prop| prop.get("type"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                if !value_matches_type(value, expected) {
                    return Err(self.invalid(
                        name,
                        format!("property '{key}' should be of type {expected}"),
                    ));
                }
            }
        }

        Ok(())
    }

    fn invalid(&self, tool: &str, reason: impl Into<String>) -> DispatchError {
        let reason = reason.into();
        warn!(tool, %reason, "Rejected tool call arguments");
        DispatchError::InvalidArguments {
            tool: tool.to_string(),
            reason,
        }
    }
}

/// Operator overrides win over server annotations; a tool that declares
/// neither is treated as mutating so it never bypasses the approval gate.
fn classify_mutating(descriptor: &ToolDescriptor, policy: &ToolPolicy) -> bool {
    let name = descriptor.name.to_lowercase();
    if policy.read_only.iter().any(|n| n.to_lowercase() == name) {
        return false;
    }
    if policy.mutating.iter().any(|n| n.to_lowercase() == name) {
        return true;
    }
    match descriptor.read_only_hint {
        Some(read_only) => !read_only,
        None => true,
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object() || value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, read_only_hint: Option<bool>) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: Some(format!("{name} description")),
            input_schema: Some(json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "params": { "type": "object" }
                },
                "required": ["query"]
            })),
            read_only_hint,
        }
    }

    #[test]
    fn renders_function_calling_schema() {
        let registry = ToolRegistry::new(
            vec![descriptor("read_neo4j_cypher", Some(true))],
            &ToolPolicy::default(),
        );
        let schemas = registry.provider_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[0]["function"]["name"], "read_neo4j_cypher");
        assert_eq!(
            schemas[0]["function"]["parameters"]["required"][0],
            "query"
        );
    }

    #[test]
    fn resolve_is_case_insensitive_and_rejects_unknown_names() {
        let registry = ToolRegistry::new(
            vec![descriptor("get_neo4j_schema", Some(true))],
            &ToolPolicy::default(),
        );
        assert!(registry.resolve("Get_Neo4j_Schema").is_ok());
        assert_eq!(
            registry.resolve("fetch_schema"),
            Err(DispatchError::UnknownTool("fetch_schema".into()))
        );
    }

    #[test]
    fn annotation_classifies_read_only_tools() {
        let registry = ToolRegistry::new(
            vec![
                descriptor("read_neo4j_cypher", Some(true)),
                descriptor("write_neo4j_cypher", Some(false)),
            ],
            &ToolPolicy::default(),
        );
        assert!(!registry.resolve("read_neo4j_cypher").unwrap().mutating);
        assert!(registry.resolve("write_neo4j_cypher").unwrap().mutating);
    }

    #[test]
    fn unannotated_tools_default_to_mutating() {
        let registry = ToolRegistry::new(
            vec![descriptor("mystery_tool", None)],
            &ToolPolicy::default(),
        );
        assert!(registry.resolve("mystery_tool").unwrap().mutating);
    }

    #[test]
    fn policy_overrides_beat_annotations() {
        let policy = ToolPolicy {
            mutating: vec!["read_neo4j_cypher".into()],
            read_only: vec!["mystery_tool".into()],
        };
        let registry = ToolRegistry::new(
            vec![
                descriptor("read_neo4j_cypher", Some(true)),
                descriptor("mystery_tool", None),
            ],
            &policy,
        );
        assert!(registry.resolve("read_neo4j_cypher").unwrap().mutating);
        assert!(!registry.resolve("mystery_tool").unwrap().mutating);
    }

    #[test]
    fn validates_required_properties_and_types() {
        let registry = ToolRegistry::new(
            vec![descriptor("read_neo4j_cypher", Some(true))],
            &ToolPolicy::default(),
        );

        registry
            .validate_arguments("read_neo4j_cypher", &json!({"query": "MATCH (n) RETURN n"}))
            .expect("valid arguments accepted");

        let missing = registry
            .validate_arguments("read_neo4j_cypher", &json!({}))
            .expect_err("missing property rejected");
        assert!(matches!(missing, DispatchError::InvalidArguments { .. }));

        let wrong_type = registry
            .validate_arguments("read_neo4j_cypher", &json!({"query": 42}))
            .expect_err("wrong type rejected");
        assert!(matches!(wrong_type, DispatchError::InvalidArguments { .. }));
    }

    #[test]
    fn null_arguments_pass_when_nothing_is_required() {
        let mut lenient = descriptor("get_neo4j_schema", Some(true));
        lenient.input_schema = Some(json!({"type": "object", "properties": {}}));
        let registry = ToolRegistry::new(vec![lenient], &ToolPolicy::default());
        registry
            .validate_arguments("get_neo4j_schema", &Value::Null)
            .expect("null treated as empty object");
    }
}
