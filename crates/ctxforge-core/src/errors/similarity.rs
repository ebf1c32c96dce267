use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosestMatch {
    pub candidate: String,
    pub similarity: f64,
}

/// Suggestion threshold for "did you mean" hints.
pub const SUGGESTION_THRESHOLD: f64 = 0.55;

pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Best candidate at or above [`SUGGESTION_THRESHOLD`]. Ties keep the first seen.
pub fn closest<'a>(needle: &str, hay: impl Iterator<Item = &'a str>) -> Option<ClosestMatch> {
    let mut best: Option<ClosestMatch> = None;
    for candidate in hay {
        let sim = similarity(needle, candidate);
        if sim >= SUGGESTION_THRESHOLD && best.as_ref().map_or(true, |b| sim > b.similarity) {
            best = Some(ClosestMatch {
                candidate: candidate.to_string(),
                similarity: sim,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_exact() {
        let hit = closest("foo", ["foo", "bar"].into_iter()).unwrap();
        assert_eq!(hit.candidate, "foo");
        assert!((hit.similarity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn closest_typo() {
        let hit = closest("loop", ["lop", "budget"].into_iter()).unwrap();
        assert_eq!(hit.candidate, "lop");
    }

    #[test]
    fn closest_none_below_threshold() {
        assert!(closest("alpha", ["zulu", "bar"].into_iter()).is_none());
    }
}
