//! Core of ctxforge: trajectory records, the grader contract, and deterministic
//! record/replay of tool calls.
//!
//! The crate is organised leaves first:
//!
//! - [`trajectory`]: the immutable record every grader consumes, plus the
//!   two-stage (lenient parse, strict validate) ingestion path.
//! - [`canonical`]: stable, redacted canonical form of a tool invocation.
//! - [`recording`]: NDJSON-backed store of canonical call -> response pairs.
//! - [`replay`]: interception of tool calls during record/replay runs.
//! - [`grader`]: the `Grader` trait and the result/evidence model.
//! - [`driver`]: fan-out/fan-in execution of a grader suite over one record.

pub mod canonical;
pub mod config;
pub mod driver;
pub mod errors;
pub mod grader;
pub mod recording;
pub mod replay;
pub mod timefmt;
pub mod trajectory;

pub use canonical::{CanonicalCall, Canonicalizer, CanonicalizerConfig};
pub use config::{GraderConfig, SuiteConfig};
pub use driver::{GradeOutcome, GradeStatus, GraderSuite, SuiteReport};
pub use errors::{ConfigError, GradeError, ValidationError, ValidationKind};
pub use grader::{Evidence, Grader, GraderResult, Requirements, Severity};
pub use recording::{RecordingError, RecordingStore, ToolRecording};
pub use replay::{
    MatchPolicy, ReplayError, ReplayMode, ReplaySession, ResponseSource, ToolExecutor,
    ToolResponse,
};
pub use trajectory::{
    AgentInfo, RunOutcome, Step, StepKind, StepType, TaskInfo, Trajectory, TrajectoryBuilder,
    UntrustedTrajectory,
};
