//! Store of canonical tool call -> response pairs, scoped per trajectory.
//!
//! Backed either by memory or by an append-only NDJSON file. Entries are
//! never mutated: the first recording for a `(trajectory, fingerprint)` pair
//! wins and later duplicates are dropped.

pub mod ndjson;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

use crate::canonical::CanonicalCall;
use crate::errors::similarity;
use crate::timefmt;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecording {
    pub trajectory_id: String,
    pub tool_name: String,
    /// Canonical (JCS, redacted) arguments.
    pub arguments: String,
    pub fingerprint: String,
    pub response: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(with = "timefmt")]
    pub recorded_at: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl ToolRecording {
    pub fn new(trajectory_id: &str, call: &CanonicalCall, response: Value) -> Self {
        Self {
            trajectory_id: trajectory_id.to_string(),
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
            fingerprint: call.fingerprint.clone(),
            response,
            latency_ms: None,
            recorded_at: timefmt::truncate_millis(Utc::now()),
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = timefmt::truncate_millis(at);
        self
    }
}

/// A stored call offered as a near miss when a lookup fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub tool_name: String,
    pub arguments: String,
    pub similarity: f64,
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("recording store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("recording store corrupt at line {line}: {message}")]
    Corrupt { line: usize, message: String },

    #[error("failed to encode recording: {0}")]
    Encode(String),

    #[error("recording store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
struct TrajectoryIndex {
    entries: Vec<ToolRecording>,
    by_fingerprint: HashMap<String, usize>,
}

impl TrajectoryIndex {
    fn insert(&mut self, entry: ToolRecording) -> bool {
        if self.by_fingerprint.contains_key(&entry.fingerprint) {
            return false;
        }
        self.by_fingerprint
            .insert(entry.fingerprint.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }
}

/// Concurrent reads share the index lock; writes are serialized through the
/// file handle so each entry lands as one whole line.
#[derive(Debug)]
pub struct RecordingStore {
    index: RwLock<HashMap<String, TrajectoryIndex>>,
    sink: Mutex<Option<File>>,
    path: Option<PathBuf>,
}

impl RecordingStore {
    pub fn in_memory() -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            sink: Mutex::new(None),
            path: None,
        }
    }

    /// Opens (or creates) an NDJSON store, loading any existing lines.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordingError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut index: HashMap<String, TrajectoryIndex> = HashMap::new();
        let mut loaded = 0usize;
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for entry in ndjson::NdjsonRecordings::new(reader) {
                let entry = entry?;
                if index
                    .entry(entry.trajectory_id.clone())
                    .or_default()
                    .insert(entry)
                {
                    loaded += 1;
                }
            }
        }
        debug!(path = %path.display(), loaded, "opened recording store");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            index: RwLock::new(index),
            sink: Mutex::new(Some(file)),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Persists `entry`. Returns `false` when the trajectory already holds a
    /// recording with the same fingerprint; the stored one is left as is.
    pub fn record(&self, entry: ToolRecording) -> Result<bool, RecordingError> {
        let mut sink = self.sink.lock().map_err(|_| RecordingError::Poisoned)?;

        if self.contains(&entry.trajectory_id, &entry.fingerprint)? {
            debug!(
                trajectory = %entry.trajectory_id,
                tool = %entry.tool_name,
                "duplicate recording ignored"
            );
            return Ok(false);
        }

        if let Some(file) = sink.as_mut() {
            let line = ndjson::to_line(&entry)?;
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }

        let mut index = self.index.write().map_err(|_| RecordingError::Poisoned)?;
        Ok(index
            .entry(entry.trajectory_id.clone())
            .or_default()
            .insert(entry))
    }

    fn contains(&self, trajectory_id: &str, fingerprint: &str) -> Result<bool, RecordingError> {
        let index = self.index.read().map_err(|_| RecordingError::Poisoned)?;
        Ok(index
            .get(trajectory_id)
            .is_some_and(|t| t.by_fingerprint.contains_key(fingerprint)))
    }

    pub fn lookup(
        &self,
        trajectory_id: &str,
        fingerprint: &str,
    ) -> Result<Option<ToolRecording>, RecordingError> {
        let index = self.index.read().map_err(|_| RecordingError::Poisoned)?;
        Ok(index.get(trajectory_id).and_then(|t| {
            t.by_fingerprint
                .get(fingerprint)
                .map(|&i| t.entries[i].clone())
        }))
    }

    /// Recordings of one trajectory in write order.
    pub fn recordings(&self, trajectory_id: &str) -> Result<Vec<ToolRecording>, RecordingError> {
        let index = self.index.read().map_err(|_| RecordingError::Poisoned)?;
        Ok(index
            .get(trajectory_id)
            .map(|t| t.entries.clone())
            .unwrap_or_default())
    }

    pub fn trajectories(&self) -> Result<Vec<String>, RecordingError> {
        let index = self.index.read().map_err(|_| RecordingError::Poisoned)?;
        let mut ids: Vec<String> = index.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn len(&self) -> Result<usize, RecordingError> {
        let index = self.index.read().map_err(|_| RecordingError::Poisoned)?;
        Ok(index.values().map(|t| t.entries.len()).sum())
    }

    /// Closest stored calls to `call`: same tool name first, then by
    /// normalized Levenshtein similarity of canonical arguments.
    pub fn nearest(
        &self,
        trajectory_id: &str,
        call: &CanonicalCall,
        limit: usize,
    ) -> Result<Vec<Candidate>, RecordingError> {
        let index = self.index.read().map_err(|_| RecordingError::Poisoned)?;
        let Some(t) = index.get(trajectory_id) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<(bool, Candidate)> = t
            .entries
            .iter()
            .map(|e| {
                (
                    e.tool_name == call.tool_name,
                    Candidate {
                        tool_name: e.tool_name.clone(),
                        arguments: e.arguments.clone(),
                        similarity: similarity::similarity(&call.arguments, &e.arguments),
                    },
                )
            })
            .collect();
        scored.sort_by(|(same_a, a), (same_b, b)| {
            same_b
                .cmp(same_a)
                .then_with(|| b.similarity.total_cmp(&a.similarity))
        });
        Ok(scored.into_iter().take(limit).map(|(_, c)| c).collect())
    }
}
