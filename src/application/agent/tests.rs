use super::*;
use crate::application::tooling::{ToolDescriptor, ToolRegistry, ToolTransport, TransportError};
use crate::config::ToolPolicy;
use crate::domain::transcript::{ToolCallRequest, Transcript, Turn};
use crate::infrastructure::model::{AssistantReply, CompletionRequest, ModelError, ModelProvider};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct ScriptedProvider {
    replies: Mutex<Vec<AssistantReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<AssistantReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        })
    }

    async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<AssistantReply, ModelError> {
        assert!(
            request.transcript.is_balanced(),
            "transcript sent to the provider must be balanced"
        );
        self.requests.lock().await.push(request);
        let mut replies = self.replies.lock().await;
        assert!(!replies.is_empty(), "provider script exhausted");
        Ok(replies.remove(0))
    }
}

struct StubTransport {
    script: Mutex<Vec<Result<Value, TransportError>>>,
    default_payload: Value,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StubTransport {
    fn returning(payload: Value) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Vec::new()),
            default_payload: payload,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn scripted(script: Vec<Result<Value, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            default_payload: json!({"content": [], "isError": false}),
            calls: Mutex::new(Vec::new()),
        })
    }

    async fn invocations(&self) -> Vec<(String, Value)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ToolTransport for StubTransport {
    async fn invoke_tool(
        &self,
        tool: &str,
        arguments: Value,
        _timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.calls.lock().await.push((tool.to_string(), arguments));
        let mut script = self.script.lock().await;
        if script.is_empty() {
            Ok(self.default_payload.clone())
        } else {
            script.remove(0)
        }
    }
}

struct RecordingApproval {
    decision: ToolDecision,
    reviewed: Mutex<Vec<String>>,
}

impl RecordingApproval {
    fn new(decision: ToolDecision) -> Arc<Self> {
        Arc::new(Self {
            decision,
            reviewed: Mutex::new(Vec::new()),
        })
    }

    async fn reviewed(&self) -> Vec<String> {
        self.reviewed.lock().await.clone()
    }
}

#[async_trait]
impl WriteApproval for RecordingApproval {
    async fn review(&self, tool: &str, _arguments: &Value) -> ToolDecision {
        self.reviewed.lock().await.push(tool.to_string());
        self.decision
    }
}

fn graph_registry() -> Arc<ToolRegistry> {
    let query_schema = json!({
        "type": "object",
        "properties": {
            "query": { "type": "string" },
            "params": { "type": "object" }
        },
        "required": ["query"]
    });
    Arc::new(ToolRegistry::new(
        vec![
            ToolDescriptor {
                name: "get_neo4j_schema".into(),
                description: Some("List labels, relationships and properties".into()),
                input_schema: Some(json!({"type": "object", "properties": {}})),
                read_only_hint: Some(true),
            },
            ToolDescriptor {
                name: "read_neo4j_cypher".into(),
                description: Some("Run a read-only Cypher query".into()),
                input_schema: Some(query_schema.clone()),
                read_only_hint: Some(true),
            },
            ToolDescriptor {
                name: "write_neo4j_cypher".into(),
                description: Some("Run a Cypher query that changes the graph".into()),
                input_schema: Some(query_schema),
                read_only_hint: Some(false),
            },
        ],
        &ToolPolicy::default(),
    ))
}

fn answer(text: &str) -> AssistantReply {
    AssistantReply {
        text: Some(text.to_string()),
        tool_calls: Vec::new(),
    }
}

fn tool_reply(tool: &str, arguments: Value) -> AssistantReply {
    AssistantReply {
        text: None,
        tool_calls: vec![ToolCallRequest::new(tool, arguments)],
    }
}

fn agent(
    provider: &Arc<ScriptedProvider>,
    transport: &Arc<StubTransport>,
    approval: Arc<dyn WriteApproval>,
    settings: AgentSettings,
) -> Agent<ScriptedProvider> {
    Agent::new(
        Arc::clone(provider),
        Arc::clone(transport) as Arc<dyn ToolTransport>,
        graph_registry(),
        approval,
        settings,
    )
}

fn settings() -> AgentSettings {
    AgentSettings::new("gemma3:1b")
}

#[tokio::test]
async fn answers_directly_without_tools() {
    let provider = ScriptedProvider::new(vec![answer("Neo4j is a graph database.")]);
    let transport = StubTransport::returning(json!({}));
    let agent = agent(&provider, &transport, Arc::new(DenyAll), settings());

    let mut transcript = Transcript::new();
    let outcome = agent
        .run(&mut transcript, "what is neo4j?".into())
        .await
        .expect("agent succeeds");

    assert_eq!(outcome.response, "Neo4j is a graph database.");
    assert!(outcome.steps.is_empty());
    assert!(!outcome.budget_exhausted);
    assert!(transport.invocations().await.is_empty());
    assert_eq!(transcript.len(), 2);
}

#[tokio::test]
async fn schema_question_runs_one_tool_round() {
    let provider = ScriptedProvider::new(vec![
        tool_reply("get_neo4j_schema", json!({})),
        answer("The graph has Customer and Order nodes."),
    ]);
    let transport = StubTransport::returning(json!({
        "content": [{ "type": "text", "text": "[\"Customer\", \"Order\"]" }],
        "isError": false
    }));
    let approval = RecordingApproval::new(ToolDecision::Deny);
    let agent = agent(
        &provider,
        &transport,
        Arc::clone(&approval) as Arc<dyn WriteApproval>,
        settings(),
    );

    let mut transcript = Transcript::new();
    let outcome = agent
        .run(&mut transcript, "What are the node labels in this graph?".into())
        .await
        .expect("agent succeeds");

    assert_eq!(outcome.response, "The graph has Customer and Order nodes.");
    assert_eq!(outcome.steps.len(), 1);
    assert!(outcome.steps[0].success);
    assert_eq!(outcome.steps[0].tool, "get_neo4j_schema");

    // Exactly one call/result pair, transcript balanced again.
    assert!(transcript.is_balanced());
    let pairs = transcript
        .turns()
        .iter()
        .filter(|turn| matches!(turn, Turn::ToolResult(_)))
        .count();
    assert_eq!(pairs, 1);
    assert_eq!(transport.invocations().await.len(), 1);
    // Read-only tool never hits the approval gate.
    assert!(approval.reviewed().await.is_empty());
}

#[tokio::test]
async fn multi_call_round_resolves_every_call_before_the_next_completion() {
    let provider = ScriptedProvider::new(vec![
        AssistantReply {
            text: None,
            tool_calls: vec![
                ToolCallRequest::new("get_neo4j_schema", json!({})),
                ToolCallRequest::new(
                    "read_neo4j_cypher",
                    json!({"query": "MATCH (n) RETURN count(n)"}),
                ),
            ],
        },
        answer("The graph holds 42 nodes across 2 labels."),
    ]);
    let transport = StubTransport::returning(json!({
        "content": [{ "type": "text", "text": "ok" }],
        "isError": false
    }));
    let agent = agent(&provider, &transport, Arc::new(DenyAll), settings());

    let mut transcript = Transcript::new();
    let outcome = agent
        .run(&mut transcript, "how many nodes, and of which labels?".into())
        .await
        .expect("agent succeeds");

    // Both calls from the one assistant turn were dispatched and answered
    // before the second completion; the scripted provider asserts the
    // transcript it receives is balanced.
    assert_eq!(outcome.steps.len(), 2);
    assert_eq!(transport.invocations().await.len(), 2);
    assert_eq!(provider.request_count().await, 2);
    let results = transcript
        .turns()
        .iter()
        .filter(|turn| matches!(turn, Turn::ToolResult(_)))
        .count();
    assert_eq!(results, 2);
    assert!(transcript.is_balanced());
}

#[tokio::test]
async fn hallucinated_tool_name_becomes_failed_result() {
    let provider = ScriptedProvider::new(vec![
        tool_reply("fetch_graph_statistics", json!({})),
        answer("I could not find that tool, sorry."),
    ]);
    let transport = StubTransport::returning(json!({}));
    let agent = agent(&provider, &transport, Arc::new(DenyAll), settings());

    let mut transcript = Transcript::new();
    let outcome = agent
        .run(&mut transcript, "how big is the graph?".into())
        .await
        .expect("loop survives the unknown tool");

    assert_eq!(outcome.steps.len(), 1);
    assert!(!outcome.steps[0].success);
    assert!(outcome.steps[0]
        .message
        .as_deref()
        .unwrap()
        .contains("unknown tool"));
    // Nothing reached the transport.
    assert!(transport.invocations().await.is_empty());
    assert!(transcript.is_balanced());
}

#[tokio::test]
async fn invalid_arguments_are_rejected_before_dispatch() {
    let provider = ScriptedProvider::new(vec![
        tool_reply("read_neo4j_cypher", json!({"params": {}})),
        answer("Let me rephrase that query."),
    ]);
    let transport = StubTransport::returning(json!({}));
    let agent = agent(&provider, &transport, Arc::new(DenyAll), settings());

    let mut transcript = Transcript::new();
    let outcome = agent
        .run(&mut transcript, "list customers".into())
        .await
        .expect("loop survives invalid arguments");

    assert!(!outcome.steps[0].success);
    assert!(outcome.steps[0]
        .message
        .as_deref()
        .unwrap()
        .contains("required property 'query'"));
    assert!(transport.invocations().await.is_empty());
}

#[tokio::test]
async fn transport_failure_keeps_transcript_well_formed() {
    let provider = ScriptedProvider::new(vec![
        tool_reply("read_neo4j_cypher", json!({"query": "MATCH (n) RETURN n"})),
        answer("The database did not respond."),
    ]);
    let transport = StubTransport::scripted(vec![Err(TransportError::Timeout(
        Duration::from_secs(30),
    ))]);
    let agent = agent(&provider, &transport, Arc::new(DenyAll), settings());

    let mut transcript = Transcript::new();
    let outcome = agent
        .run(&mut transcript, "list everything".into())
        .await
        .expect("loop survives the timeout");

    assert!(!outcome.steps[0].success);
    assert!(transcript.is_balanced());
    assert_eq!(outcome.response, "The database did not respond.");
}

#[tokio::test]
async fn connection_loss_is_fatal() {
    let provider = ScriptedProvider::new(vec![tool_reply(
        "read_neo4j_cypher",
        json!({"query": "MATCH (n) RETURN n"}),
    )]);
    let transport = StubTransport::scripted(vec![Err(TransportError::ConnectionLost)]);
    let agent = agent(&provider, &transport, Arc::new(DenyAll), settings());

    let mut transcript = Transcript::new();
    let err = agent
        .run(&mut transcript, "list everything".into())
        .await
        .expect_err("connection loss escalates");
    assert!(matches!(err, AgentError::ConnectionLost));
}

#[tokio::test]
async fn turn_budget_forces_degraded_termination() {
    let mut replies = Vec::new();
    for _ in 0..10 {
        replies.push(tool_reply("get_neo4j_schema", json!({})));
    }
    let provider = ScriptedProvider::new(replies);
    let transport = StubTransport::returning(json!({
        "content": [{ "type": "text", "text": "still thinking" }],
        "isError": false
    }));
    let mut config = settings();
    config.turn_budget = 3;
    let agent = agent(&provider, &transport, Arc::new(DenyAll), config);

    let mut transcript = Transcript::new();
    let outcome = agent
        .run(&mut transcript, "keep going forever".into())
        .await
        .expect("budget exhaustion is not an error");

    assert!(outcome.budget_exhausted);
    assert!(outcome.response.contains("tool-call limit"));
    // Three executed rounds, the fourth was cut off before dispatch.
    assert_eq!(transport.invocations().await.len(), 3);
    assert_eq!(provider.request_count().await, 4);
    assert!(transcript.is_balanced());
}

#[tokio::test]
async fn denied_mutation_never_reaches_the_transport() {
    let provider = ScriptedProvider::new(vec![
        tool_reply(
            "write_neo4j_cypher",
            json!({"query": "CREATE (c:Customer {name: 'Alice Wong'})"}),
        ),
        answer("Understood, I will not create the customer."),
    ]);
    let transport = StubTransport::returning(json!({}));
    let approval = RecordingApproval::new(ToolDecision::Deny);
    let agent = agent(
        &provider,
        &transport,
        Arc::clone(&approval) as Arc<dyn WriteApproval>,
        settings(),
    );

    let mut transcript = Transcript::new();
    let outcome = agent
        .run(&mut transcript, "Add a new customer named Alice Wong".into())
        .await
        .expect("agent succeeds");

    assert_eq!(approval.reviewed().await, vec!["write_neo4j_cypher"]);
    assert!(transport.invocations().await.is_empty());
    assert!(!outcome.steps[0].success);
    assert!(outcome.steps[0]
        .message
        .as_deref()
        .unwrap()
        .contains("declined"));
}

#[tokio::test]
async fn approved_mutation_is_dispatched() {
    let provider = ScriptedProvider::new(vec![
        tool_reply(
            "write_neo4j_cypher",
            json!({"query": "CREATE (c:Customer {name: 'Alice Wong'})"}),
        ),
        answer("Created the customer."),
    ]);
    let transport = StubTransport::returning(json!({
        "content": [{ "type": "text", "text": "1 node created" }],
        "isError": false
    }));
    let approval = RecordingApproval::new(ToolDecision::Approve);
    let agent = agent(
        &provider,
        &transport,
        Arc::clone(&approval) as Arc<dyn WriteApproval>,
        settings(),
    );

    let mut transcript = Transcript::new();
    let outcome = agent
        .run(&mut transcript, "Add a new customer named Alice Wong".into())
        .await
        .expect("agent succeeds");

    assert_eq!(approval.reviewed().await, vec!["write_neo4j_cypher"]);
    assert_eq!(transport.invocations().await.len(), 1);
    assert!(outcome.steps[0].success);
    assert_eq!(outcome.response, "Created the customer.");
}

#[tokio::test]
async fn tool_error_payload_becomes_failed_result() {
    let provider = ScriptedProvider::new(vec![
        tool_reply("read_neo4j_cypher", json!({"query": "MATCH (n RETURN n"})),
        answer("The query had a syntax error."),
    ]);
    let transport = StubTransport::returning(json!({
        "content": [{ "type": "text", "text": "Invalid input 'RETURN'" }],
        "isError": true
    }));
    let agent = agent(&provider, &transport, Arc::new(DenyAll), settings());

    let mut transcript = Transcript::new();
    let outcome = agent
        .run(&mut transcript, "run my broken query".into())
        .await
        .expect("agent succeeds");

    assert!(!outcome.steps[0].success);
    assert_eq!(
        outcome.steps[0].message.as_deref(),
        Some("Invalid input 'RETURN'")
    );
}
