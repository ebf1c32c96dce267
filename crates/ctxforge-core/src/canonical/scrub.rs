//! Value-level secret scrubbing. Key-based redaction lives in the
//! canonicalizer; this catches secrets that show up inside string values
//! regardless of the key they sit under.

use lazy_static::lazy_static;
use regex::{NoExpand, Regex};
use std::borrow::Cow;

lazy_static! {
    /// Bearer token; token part redacted, scheme kept.
    static ref BEARER_TOKEN: Regex = Regex::new(r"(?i)\bBearer\s+[^\s\[][^\s]*").unwrap();
    /// sk- or sk_ at a word start, followed by 20+ key chars (sk-proj-, sk_live_).
    /// Values like `risk-...` or `task_...` are ordinary data and stay intact.
    static ref SK_KEY: Regex = Regex::new(r"\bsk[-_][A-Za-z0-9_-]{20,}").unwrap();
}

/// Replaces bearer tokens and `sk-` style keys inside `s` with `token`.
/// Running it twice gives the same output as running it once.
pub fn scrub_str<'a>(s: &'a str, token: &str) -> Cow<'a, str> {
    if !contains_secret(s) {
        return Cow::Borrowed(s);
    }
    let bearer = format!("Bearer {token}");
    let out = BEARER_TOKEN.replace_all(s, NoExpand(&bearer));
    let out = SK_KEY.replace_all(&out, NoExpand(token)).into_owned();
    Cow::Owned(out)
}

pub fn contains_secret(s: &str) -> bool {
    BEARER_TOKEN.is_match(s) || SK_KEY.is_match(s)
}
