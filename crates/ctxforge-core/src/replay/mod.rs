//! Record/replay interception of tool calls.
//!
//! A [`ReplaySession`] sits between an agent and its tools. In `record` mode
//! every call goes to the real [`ToolExecutor`] and the response is stored
//! before the caller sees it. In `replay` mode calls resolve from the
//! [`RecordingStore`] by `(trajectory, tool, canonical arguments)` only, so
//! the order in which concurrent calls arrive never changes what they get.

mod errors;
mod executor;
mod trajectory;

pub use errors::ReplayError;
pub use executor::{FnExecutor, ToolExecutor};
pub use trajectory::{record_from_trajectory, replay_trajectory};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::canonical::{CanonicalCall, Canonicalizer};
use crate::recording::{RecordingStore, ToolRecording};

/// Candidates attached to a miss.
const MISS_CANDIDATES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    /// Call the real tool and store the response.
    Record,
    /// Resolve from the store; no external calls on a hit.
    #[default]
    Replay,
    /// Call the real tool, store nothing.
    Passthrough,
}

impl fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReplayMode::Record => "record",
            ReplayMode::Replay => "replay",
            ReplayMode::Passthrough => "passthrough",
        })
    }
}

impl FromStr for ReplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "record" => Ok(ReplayMode::Record),
            "replay" => Ok(ReplayMode::Replay),
            "passthrough" | "off" => Ok(ReplayMode::Passthrough),
            other => Err(format!("unknown replay mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Any miss fails the run.
    #[default]
    Strict,
    /// A miss falls through to the real tool.
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Recorded,
    Live,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub value: Value,
    pub source: ResponseSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Clone)]
pub struct ReplaySession {
    trajectory_id: String,
    mode: ReplayMode,
    policy: MatchPolicy,
    store: Arc<RecordingStore>,
    canonicalizer: Arc<Canonicalizer>,
    executor: Option<Arc<dyn ToolExecutor>>,
    deadline: Option<(tokio::time::Instant, u64)>,
}

impl fmt::Debug for ReplaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplaySession")
            .field("trajectory_id", &self.trajectory_id)
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}

impl ReplaySession {
    pub fn new(trajectory_id: impl Into<String>, mode: ReplayMode, store: Arc<RecordingStore>) -> Self {
        Self {
            trajectory_id: trajectory_id.into(),
            mode,
            policy: MatchPolicy::Strict,
            store,
            canonicalizer: Arc::new(Canonicalizer::default()),
            executor: None,
            deadline: None,
        }
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_canonicalizer(mut self, canonicalizer: Arc<Canonicalizer>) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Deadline for the whole run, counted from now. Must be called inside a
    /// tokio runtime.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.deadline = Some((tokio::time::Instant::now() + timeout, ms));
        self
    }

    pub fn trajectory_id(&self) -> &str {
        &self.trajectory_id
    }

    pub fn mode(&self) -> ReplayMode {
        self.mode
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    /// Resolves one tool invocation according to mode and policy.
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResponse, ReplayError> {
        match self.deadline {
            Some((deadline, timeout_ms)) => {
                tokio::time::timeout_at(deadline, self.resolve(tool_name, arguments))
                    .await
                    .map_err(|_| ReplayError::Timeout { timeout_ms })?
            }
            None => self.resolve(tool_name, arguments).await,
        }
    }

    async fn resolve(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResponse, ReplayError> {
        let call = self.canonicalizer.canonicalize(tool_name, arguments);
        match self.mode {
            ReplayMode::Replay => self.from_store(&call, tool_name, arguments).await,
            ReplayMode::Record => {
                let (value, latency_ms) = self.call_live(tool_name, arguments).await?;
                let entry = ToolRecording::new(&self.trajectory_id, &call, value.clone())
                    .with_latency(latency_ms);
                self.store.record(entry)?;
                Ok(ToolResponse {
                    value,
                    source: ResponseSource::Live,
                    latency_ms: Some(latency_ms),
                })
            }
            ReplayMode::Passthrough => {
                let (value, latency_ms) = self.call_live(tool_name, arguments).await?;
                Ok(ToolResponse {
                    value,
                    source: ResponseSource::Live,
                    latency_ms: Some(latency_ms),
                })
            }
        }
    }

    async fn from_store(
        &self,
        call: &CanonicalCall,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResponse, ReplayError> {
        if let Some(hit) = self.store.lookup(&self.trajectory_id, &call.fingerprint)? {
            debug!(tool = %call.tool_name, fingerprint = %call.fingerprint, "replay hit");
            return Ok(ToolResponse {
                value: hit.response,
                source: ResponseSource::Recorded,
                latency_ms: hit.latency_ms,
            });
        }

        match self.policy {
            MatchPolicy::Strict => Err(ReplayError::Miss {
                tool_name: call.tool_name.clone(),
                canonical_arguments: call.arguments.clone(),
                trajectory_id: self.trajectory_id.clone(),
                candidates: self
                    .store
                    .nearest(&self.trajectory_id, call, MISS_CANDIDATES)?,
            }),
            MatchPolicy::Lenient => {
                warn!(
                    tool = %call.tool_name,
                    arguments = %call.arguments,
                    trajectory = %self.trajectory_id,
                    "replay miss, falling through to live tool"
                );
                let (value, latency_ms) = self.call_live(tool_name, arguments).await?;
                Ok(ToolResponse {
                    value,
                    source: ResponseSource::Live,
                    latency_ms: Some(latency_ms),
                })
            }
        }
    }

    async fn call_live(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<(Value, u64), ReplayError> {
        let executor = self
            .executor
            .as_ref()
            .ok_or(ReplayError::NoExecutor { mode: self.mode })?;
        let start = Instant::now();
        let value = executor
            .execute(tool_name, arguments)
            .await
            .map_err(|e| ReplayError::Execution {
                tool_name: tool_name.to_string(),
                message: format!("{e:#}"),
            })?;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok((value, latency_ms))
    }
}
