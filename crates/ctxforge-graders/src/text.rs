//! Text helpers shared by the graders.

use serde_json::Value;

/// Lowercases and collapses runs of whitespace to a single space.
pub fn normalize(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every string leaf under `v`, depth first, object keys in map order.
pub fn string_leaves<'a>(v: &'a Value, out: &mut Vec<&'a str>) {
    match v {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|i| string_leaves(i, out)),
        Value::Object(obj) => obj.values().for_each(|i| string_leaves(i, out)),
        _ => {}
    }
}

/// Whether `needle` occurs in `haystack` with no alphanumeric character
/// directly before it, and, when `whole` is set, none directly after it.
pub fn contains_token(haystack: &str, needle: &str, whole: bool) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(at, m)| {
        let before = haystack[..at].chars().next_back();
        let after = haystack[at + m.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric)
            && (!whole || !after.is_some_and(char::is_alphanumeric))
    })
}

/// First `max` characters, with an ellipsis when cut.
pub fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize("  Where IS\n\tmy   order? "), "where is my order?");
    }

    #[test]
    fn string_leaves_walks_nested_values() {
        let v = json!({"a": ["x", {"b": "y"}], "n": 1, "c": "z"});
        let mut out = Vec::new();
        string_leaves(&v, &mut out);
        assert_eq!(out, vec!["x", "y", "z"]);
    }

    #[test]
    fn tokens_respect_alphanumeric_neighbours() {
        assert!(contains_token("see doc-1.", "doc-1", true));
        assert!(!contains_token("see doc-17 and doc-10", "doc-1", true));
        assert!(contains_token("see doc-17 and doc-1", "doc-1", true));
        assert!(!contains_token("banana", "a", true));
        assert!(contains_token("aaaa", "aa", false));
        assert!(!contains_token("baaa", "aa", false));
        assert!(!contains_token("anything", "", true));
    }

    #[test]
    fn preview_cuts_on_char_boundary() {
        assert_eq!(preview("héllo wörld", 5), "héllo...");
        assert_eq!(preview("hi", 5), "hi");
    }
}
