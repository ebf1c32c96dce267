//! NDJSON encoding for tool recordings: one JCS object per line.

use std::io::BufRead;

use super::{RecordingError, ToolRecording};

/// Lazily parses recordings from a reader, skipping blank lines.
pub struct NdjsonRecordings<R: BufRead> {
    reader: R,
    line_buffer: String,
    line_number: usize,
}

impl<R: BufRead> NdjsonRecordings<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buffer: String::new(),
            line_number: 0,
        }
    }
}

impl<R: BufRead> Iterator for NdjsonRecordings<R> {
    type Item = Result<ToolRecording, RecordingError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line_buffer.clear();
            match self.reader.read_line(&mut self.line_buffer) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_number += 1;
                    let line = self.line_buffer.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let parsed = serde_json::from_str::<ToolRecording>(line).map_err(|e| {
                        RecordingError::Corrupt {
                            line: self.line_number,
                            message: format!("{e} in `{}`", truncate_line(line, 60)),
                        }
                    });
                    return Some(parsed);
                }
                Err(e) => return Some(Err(RecordingError::Io(e))),
            }
        }
    }
}

/// Canonical line for one recording, newline included.
pub fn to_line(entry: &ToolRecording) -> Result<String, RecordingError> {
    let mut line =
        serde_jcs::to_string(entry).map_err(|e| RecordingError::Encode(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

fn truncate_line(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let head: String = line.chars().take(max).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timefmt;
    use serde_json::json;
    use std::io::Cursor;

    fn entry(fp: &str) -> ToolRecording {
        ToolRecording {
            trajectory_id: "run-1".into(),
            tool_name: "search".into(),
            arguments: r#"{"q":"x"}"#.into(),
            fingerprint: fp.into(),
            response: json!({"hits": 2}),
            latency_ms: Some(12),
            recorded_at: timefmt::parse("2025-01-01T00:00:00Z").unwrap(),
            schema_version: 1,
        }
    }

    #[test]
    fn lines_are_single_line_and_sorted() {
        let line = to_line(&entry("ab")).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.starts_with(r#"{"arguments":"#));
    }

    #[test]
    fn reads_back_with_blank_lines() {
        let mut buf = to_line(&entry("a")).unwrap();
        buf.push('\n');
        buf.push_str(&to_line(&entry("b")).unwrap());
        let items: Vec<_> = NdjsonRecordings::new(Cursor::new(buf))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].fingerprint, "b");
    }

    #[test]
    fn corrupt_line_reports_line_number() {
        let mut buf = to_line(&entry("a")).unwrap();
        buf.push_str("{not json\n");
        let mut it = NdjsonRecordings::new(Cursor::new(buf));
        assert!(it.next().unwrap().is_ok());
        match it.next().unwrap() {
            Err(RecordingError::Corrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
