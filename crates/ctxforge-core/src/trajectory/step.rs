use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::timefmt;

/// Discriminator for [`StepKind`], usable without a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    UserInput,
    LlmCall,
    ToolCall,
    Retrieval,
    MemoryRead,
    MemoryWrite,
    Interrupt,
    StateChange,
    FinalOutput,
}

impl StepType {
    pub const ALL: [StepType; 9] = [
        StepType::UserInput,
        StepType::LlmCall,
        StepType::ToolCall,
        StepType::Retrieval,
        StepType::MemoryRead,
        StepType::MemoryWrite,
        StepType::Interrupt,
        StepType::StateChange,
        StepType::FinalOutput,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::UserInput => "user_input",
            StepType::LlmCall => "llm_call",
            StepType::ToolCall => "tool_call",
            StepType::Retrieval => "retrieval",
            StepType::MemoryRead => "memory_read",
            StepType::MemoryWrite => "memory_write",
            StepType::Interrupt => "interrupt",
            StepType::StateChange => "state_change",
            StepType::FinalOutput => "final_output",
        }
    }

    /// Fields that must be present and non-null for this step type.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            StepType::UserInput => &["content"],
            StepType::LlmCall => &["model", "input", "output"],
            StepType::ToolCall => &["tool_name", "arguments"],
            StepType::Retrieval => &["query", "results"],
            StepType::MemoryRead => &["query", "results"],
            StepType::MemoryWrite => &["operation", "data"],
            StepType::Interrupt => &["prompt", "response", "wait_duration_ms"],
            StepType::StateChange => &["state_key", "new_value"],
            StepType::FinalOutput => &["content"],
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown step_type '{s}'"))
    }
}

/// One typed event in a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    #[serde(with = "timefmt")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn new(step_id: impl Into<String>, timestamp: DateTime<Utc>, kind: impl Into<StepKind>) -> Self {
        Self {
            step_id: step_id.into(),
            timestamp: timefmt::truncate_millis(timestamp),
            parent_step_id: None,
            metadata: None,
            kind: kind.into(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_step_id = Some(parent.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn step_type(&self) -> StepType {
        self.kind.step_type()
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match &self.kind {
            StepKind::ToolCall(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_llm_call(&self) -> Option<&LlmCall> {
        match &self.kind {
            StepKind::LlmCall(c) => Some(c),
            _ => None,
        }
    }

    /// True if the serialized step carries a non-null value under `field`.
    pub fn has_field(&self, field: &str) -> bool {
        match serde_json::to_value(self) {
            Ok(Value::Object(obj)) => obj.get(field).is_some_and(|v| !v.is_null()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepKind {
    UserInput(UserInput),
    LlmCall(LlmCall),
    ToolCall(ToolCall),
    Retrieval(Retrieval),
    MemoryRead(MemoryRead),
    MemoryWrite(MemoryWrite),
    Interrupt(Interrupt),
    StateChange(StateChange),
    FinalOutput(FinalOutput),
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::UserInput(_) => StepType::UserInput,
            StepKind::LlmCall(_) => StepType::LlmCall,
            StepKind::ToolCall(_) => StepType::ToolCall,
            StepKind::Retrieval(_) => StepType::Retrieval,
            StepKind::MemoryRead(_) => StepType::MemoryRead,
            StepKind::MemoryWrite(_) => StepType::MemoryWrite,
            StepKind::Interrupt(_) => StepType::Interrupt,
            StepKind::StateChange(_) => StepType::StateChange,
            StepKind::FinalOutput(_) => StepType::FinalOutput,
        }
    }
}

macro_rules! impl_into_kind {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for StepKind {
                fn from(v: $variant) -> Self {
                    StepKind::$variant(v)
                }
            }
        )*
    };
}

impl_into_kind!(
    UserInput,
    LlmCall,
    ToolCall,
    Retrieval,
    MemoryRead,
    MemoryWrite,
    Interrupt,
    StateChange,
    FinalOutput,
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInput {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

/// Prompt of a model call: plain text or a chat message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LlmInput {
    Text(String),
    Messages(Vec<ChatMessage>),
}

impl LlmInput {
    /// Flattened prompt text; message contents joined by newlines.
    pub fn text(&self) -> String {
        match self {
            LlmInput::Text(s) => s.clone(),
            LlmInput::Messages(msgs) => msgs
                .iter()
                .map(|m| value_text(&m.content))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LlmOutput {
    Text(String),
    Structured(Map<String, Value>),
}

impl LlmOutput {
    pub fn text(&self) -> String {
        match self {
            LlmOutput::Text(s) => s.clone(),
            LlmOutput::Structured(obj) => match obj.get("content") {
                Some(Value::String(s)) => s.clone(),
                _ => Value::Object(obj.clone()).to_string(),
            },
        }
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(parts) => parts.iter().map(value_text).collect::<Vec<_>>().join("\n"),
        Value::Object(obj) => match obj.get("text") {
            Some(Value::String(s)) => s.clone(),
            _ => v.to_string(),
        },
        other => other.to_string(),
    }
}

/// A string field that some producers fill with a structured object instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextOrObject {
    Text(String),
    Object(Map<String, Value>),
}

impl TextOrObject {
    /// The string itself, or the object as compact JSON.
    pub fn text(&self) -> String {
        match self {
            TextOrObject::Text(s) => s.clone(),
            TextOrObject::Object(obj) => Value::Object(obj.clone()).to_string(),
        }
    }
}

impl fmt::Display for TextOrObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

impl From<&str> for TextOrObject {
    fn from(s: &str) -> Self {
        TextOrObject::Text(s.to_string())
    }
}

impl From<String> for TextOrObject {
    fn from(s: String) -> Self {
        TextOrObject::Text(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCall {
    pub model: String,
    pub input: LlmInput,
    pub output: LlmOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl LlmCall {
    /// `tokens_total` when reported, otherwise in + out. Missing counts are zero.
    pub fn total_tokens(&self) -> u64 {
        self.tokens_total.unwrap_or_else(|| {
            self.tokens_in
                .unwrap_or(0)
                .saturating_add(self.tokens_out.unwrap_or(0))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceImpact {
    pub amount: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_impact: Option<ResourceImpact>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            result: None,
            latency_ms: None,
            success: None,
            error: None,
            resource_impact: None,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl RetrievedItem {
    /// First of `id`, `doc_id`, `source` found in the item metadata.
    pub fn identifier(&self) -> Option<String> {
        let meta = self.metadata.as_ref()?;
        ["id", "doc_id", "source"].iter().find_map(|k| match meta.get(*k) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrieval {
    pub query: String,
    pub results: Vec<RetrievedItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRead {
    pub query: TextOrObject,
    pub results: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_scores: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_available: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOperation {
    Add,
    Update,
    Delete,
    /// Full replacement of the stored value.
    Put,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// Storage namespace: a single name, or path segments such as
/// `["profiles", "user_123"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Namespace {
    Name(String),
    Path(Vec<String>),
}

impl Namespace {
    /// Segments joined with `/`.
    pub fn joined(&self) -> String {
        match self {
            Namespace::Name(s) => s.clone(),
            Namespace::Path(parts) => parts.join("/"),
        }
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Namespace::Name(s.to_string())
    }
}

impl From<String> for Namespace {
    fn from(s: String) -> Self {
        Namespace::Name(s)
    }
}

impl From<Vec<String>> for Namespace {
    fn from(parts: Vec<String>) -> Self {
        Namespace::Path(parts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryWrite {
    pub operation: MemoryOperation,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<FieldChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl MemoryWrite {
    pub fn new(operation: MemoryOperation, data: Value) -> Self {
        Self {
            operation,
            data,
            namespace: None,
            key: None,
            changes: None,
            triggered_by_step_id: None,
            entity_type: None,
            entity_id: None,
        }
    }

    /// `namespace/key` slot this write targets, if addressed.
    pub fn slot(&self) -> Option<(String, String)> {
        let key = self.key.clone().or_else(|| self.entity_id.clone())?;
        let ns = self
            .namespace
            .as_ref()
            .map(Namespace::joined)
            .or_else(|| self.entity_type.clone())
            .unwrap_or_default();
        Some((ns, key))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub prompt: String,
    pub response: TextOrObject,
    pub wait_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub state_key: String,
    pub new_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_type_tag_is_flattened() {
        let ts = timefmt::parse("2025-01-01T00:00:00Z").unwrap();
        let mut args = Map::new();
        args.insert("order_id".into(), json!("12345"));
        let step = Step::new("s1", ts, ToolCall::new("check_order_status", args));

        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["step_type"], "tool_call");
        assert_eq!(v["tool_name"], "check_order_status");
        assert_eq!(v["timestamp"], "2025-01-01T00:00:00.000Z");
        assert!(v.get("result").is_none());

        let back: Step = serde_json::from_value(v).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn llm_input_accepts_text_or_messages() {
        let text: LlmInput = serde_json::from_value(json!("hello")).unwrap();
        assert_eq!(text.text(), "hello");

        let msgs: LlmInput = serde_json::from_value(json!([
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": [{"type": "text", "text": "hi"}]}
        ]))
        .unwrap();
        assert_eq!(msgs.text(), "be brief\nhi");
    }

    #[test]
    fn total_tokens_prefers_reported_total() {
        let mut call = LlmCall {
            model: "m".into(),
            input: LlmInput::Text("p".into()),
            output: LlmOutput::Text("r".into()),
            tokens_in: Some(10),
            tokens_out: Some(5),
            tokens_total: None,
            latency_ms: None,
            cost_estimate: None,
            provider: None,
        };
        assert_eq!(call.total_tokens(), 15);
        call.tokens_total = Some(40);
        assert_eq!(call.total_tokens(), 40);
    }

    #[test]
    fn total_tokens_saturates() {
        let call = LlmCall {
            model: "m".into(),
            input: LlmInput::Text("p".into()),
            output: LlmOutput::Text("r".into()),
            tokens_in: Some(u64::MAX),
            tokens_out: Some(7),
            tokens_total: None,
            latency_ms: None,
            cost_estimate: None,
            provider: None,
        };
        assert_eq!(call.total_tokens(), u64::MAX);
    }

    #[test]
    fn namespace_path_joins_into_slot() {
        let mut w: MemoryWrite = serde_json::from_value(json!({
            "operation": "put",
            "data": {"name": "Ada"},
            "namespace": ["profiles", "user_123"],
            "key": "main"
        }))
        .unwrap();
        assert_eq!(w.slot(), Some(("profiles/user_123".to_string(), "main".to_string())));

        w.namespace = Some("profiles".into());
        assert_eq!(w.slot().unwrap().0, "profiles");
    }

    #[test]
    fn step_type_from_str() {
        assert_eq!("memory_write".parse::<StepType>().unwrap(), StepType::MemoryWrite);
        assert!("bogus".parse::<StepType>().is_err());
    }

    #[test]
    fn retrieved_item_identifier_order() {
        let item: RetrievedItem = serde_json::from_value(json!({
            "content": "x",
            "metadata": {"source": "wiki", "doc_id": "d-7"}
        }))
        .unwrap();
        assert_eq!(item.identifier().as_deref(), Some("d-7"));
    }
}
