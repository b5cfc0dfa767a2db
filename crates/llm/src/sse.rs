//! Incremental server-sent-events decoding for the completion stream.
//!
//! The transport delivers byte chunks that do not respect line boundaries,
//! so decoding is split in two: draining complete lines out of a carry
//! buffer, then interpreting each `data:` line.

use serde_json::Value;

/// One decoded `data:` line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseLine {
    Payload(Value),
    Done,
}

/// Drains every complete line out of `buffer`, leaving a partial trailing
/// line (if any) for the next chunk to finish.
pub(crate) fn drain_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(newline) = buffer.find('\n') {
        let line: String = buffer.drain(..=newline).collect();
        lines.push(line.trim_end_matches(['\n', '\r']).to_string());
    }
    lines
}

/// Interprets one line. Blank keep-alives, comments and anything that is
/// not a parseable `data:` payload decode to `None`.
pub(crate) fn parse_line(line: &str) -> Option<SseLine> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseLine::Done);
    }
    serde_json::from_str(data).ok().map(SseLine::Payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drains_only_complete_lines() {
        let mut buffer = String::from("data: one\r\ndata: two\ndata: par");
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec!["data: one", "data: two"]);
        assert_eq!(buffer, "data: par");

        buffer.push_str("tial\n");
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec!["data: partial"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn parses_payload_done_and_noise() {
        assert_eq!(
            parse_line(r#"data: {"x": 1}"#),
            Some(SseLine::Payload(json!({"x": 1}))),
        );
        assert_eq!(parse_line("data: [DONE]"), Some(SseLine::Done));
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line(": keep-alive"), None);
        assert_eq!(parse_line("event: message"), None);
        assert_eq!(parse_line("data: not json"), None);
    }

    #[test]
    fn payload_split_across_chunks_decodes_once_complete() {
        let mut buffer = String::new();
        buffer.push_str(r#"data: {"delta""#);
        assert!(drain_lines(&mut buffer).is_empty());

        buffer.push_str(": \"hi\"}\n");
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines.len(), 1);
        assert_eq!(
            parse_line(&lines[0]),
            Some(SseLine::Payload(json!({"delta": "hi"}))),
        );
    }
}
