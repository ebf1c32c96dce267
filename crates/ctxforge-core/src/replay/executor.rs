use async_trait::async_trait;
use serde_json::{Map, Value};

/// The real tool implementation behind a replay session.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, arguments: &Map<String, Value>) -> anyhow::Result<Value>;
}

/// Executor backed by a plain closure; handy for tests and simple adapters.
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F> ToolExecutor for FnExecutor<F>
where
    F: Fn(&str, &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync,
{
    async fn execute(&self, tool_name: &str, arguments: &Map<String, Value>) -> anyhow::Result<Value> {
        (self.0)(tool_name, arguments)
    }
}
