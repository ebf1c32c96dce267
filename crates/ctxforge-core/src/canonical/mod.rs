//! Canonical form of a tool invocation.
//!
//! The canonical arguments string is RFC 8785 (JCS) JSON of the redacted
//! argument map: keys sorted, numbers in ECMAScript form, no whitespace.
//! It is both the recording key and the replay lookup key, so it must not
//! depend on insertion order, locale or the machine that produced it.

pub mod scrub;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const REDACTED: &str = "[REDACTED]";

pub const DEFAULT_REDACT_KEYS: [&str; 6] = [
    r"(?i)api[_-]?key",
    r"(?i)^(access_|refresh_|auth_|session_|id_)?token$",
    r"(?i)secret",
    r"(?i)passw(or)?d",
    r"(?i)^(proxy-)?authorization$",
    r"(?i)cookie",
];

lazy_static! {
    static ref DEFAULT_KEY_PATTERNS: Vec<Regex> = DEFAULT_REDACT_KEYS
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalizerConfig {
    /// Regexes matched against object keys at any depth.
    pub redact_keys: Vec<String>,
    pub redaction_token: String,
    /// Also scrub bearer tokens and `sk-` keys inside string values.
    #[serde(default = "default_true")]
    pub scrub_values: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CanonicalizerConfig {
    fn default() -> Self {
        Self {
            redact_keys: DEFAULT_REDACT_KEYS.iter().map(|s| s.to_string()).collect(),
            redaction_token: REDACTED.to_string(),
            scrub_values: true,
        }
    }
}

/// A tool call reduced to its comparable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalCall {
    pub tool_name: String,
    /// JCS string of the redacted arguments.
    pub arguments: String,
    /// sha256 hex of `tool_name|arguments`.
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct Canonicalizer {
    key_patterns: Vec<Regex>,
    token: String,
    scrub_values: bool,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self {
            key_patterns: DEFAULT_KEY_PATTERNS.clone(),
            token: REDACTED.to_string(),
            scrub_values: true,
        }
    }
}

impl Canonicalizer {
    pub fn new(config: CanonicalizerConfig) -> Result<Self, regex::Error> {
        let key_patterns = config
            .redact_keys
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            key_patterns,
            token: config.redaction_token,
            scrub_values: config.scrub_values,
        })
    }

    pub fn redaction_token(&self) -> &str {
        &self.token
    }

    fn is_sensitive_key(&self, key: &str) -> bool {
        self.key_patterns.iter().any(|re| re.is_match(key))
    }

    /// Redacted copy of `value`. Idempotent.
    pub fn canonical_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(obj) => Value::Object(self.canonical_map(obj)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.canonical_value(v)).collect()),
            Value::String(s) if self.scrub_values => {
                Value::String(scrub::scrub_str(s, &self.token).into_owned())
            }
            other => other.clone(),
        }
    }

    pub fn canonical_map(&self, obj: &Map<String, Value>) -> Map<String, Value> {
        obj.iter()
            .map(|(k, v)| {
                let v = if self.is_sensitive_key(k) && !v.is_null() {
                    Value::String(self.token.clone())
                } else {
                    self.canonical_value(v)
                };
                (k.clone(), v)
            })
            .collect()
    }

    /// JCS string of the redacted value.
    pub fn canonical_json(&self, value: &Value) -> String {
        let v = self.canonical_value(value);
        serde_jcs::to_string(&v).unwrap_or_else(|_| v.to_string())
    }

    pub fn canonicalize(&self, tool_name: &str, arguments: &Map<String, Value>) -> CanonicalCall {
        let tool_name = tool_name.trim().to_string();
        let arguments = self.canonical_json(&Value::Object(arguments.clone()));
        let fingerprint = fingerprint(&tool_name, &arguments);
        CanonicalCall {
            tool_name,
            arguments,
            fingerprint,
        }
    }
}

pub fn fingerprint(tool_name: &str, canonical_arguments: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_arguments.as_bytes());
    hex::encode(hasher.finalize())
}
