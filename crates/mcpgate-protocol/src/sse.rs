//! Server-Sent Events framing
//!
//! The gateway both emits and parses SSE frames (parsing is needed for the
//! replay endpoint tests and for backends that speak SSE). A frame is
//! `id:` / `event:` / `data:` lines terminated by a blank line; multi-line
//! data is carried as repeated `data:` lines and rejoined with `\n`.

use crate::error::{ProtocolError, ProtocolResult};

/// One SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event id, used as the replay cursor
    pub id: Option<String>,
    /// Event name; `None` means the default `message` event
    pub event: Option<String>,
    /// Event data; may contain embedded newlines
    pub data: String,
}

impl SseFrame {
    /// A data frame with an id
    pub fn message(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            event: None,
            data: data.into(),
        }
    }

    /// A named event frame with an id
    pub fn event(id: impl Into<String>, event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// The keep-alive frame: `event: ping` with empty data and no id
    pub fn keep_alive() -> Self {
        Self {
            id: None,
            event: Some("ping".to_string()),
            data: String::new(),
        }
    }

    /// Encode to wire text, terminated by the blank line
    ///
    /// Encoding is deterministic: field order is always id, event, data, and
    /// embedded newlines split into repeated `data:` lines.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }

    /// Parse one frame from wire text
    ///
    /// Accepts input with or without the trailing blank line. Comment lines
    /// (leading `:`) are skipped per the SSE spec.
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        let mut id = None;
        let mut event = None;
        let mut data_lines: Vec<&str> = Vec::new();
        let mut saw_field = false;

        for line in text.lines() {
            if line.is_empty() {
                if saw_field {
                    break;
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix(':') {
                let _ = rest; // comment line
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            saw_field = true;
            match field {
                "id" => id = Some(value.to_string()),
                "event" => event = Some(value.to_string()),
                "data" => data_lines.push(value),
                "retry" => {}
                other => {
                    return Err(ProtocolError::MalformedFrame(format!(
                        "unknown SSE field: {other}"
                    )));
                }
            }
        }

        if !saw_field {
            return Err(ProtocolError::MalformedFrame("empty SSE frame".to_string()));
        }

        Ok(Self {
            id,
            event,
            data: data_lines.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_single_line() {
        let frame = SseFrame::message("3", r#"{"x":1}"#);
        assert_eq!(frame.encode(), "id: 3\ndata: {\"x\":1}\n\n");
    }

    #[test]
    fn encode_multi_line_data() {
        let frame = SseFrame::event("7", "message", "line one\nline two");
        assert_eq!(
            frame.encode(),
            "id: 7\nevent: message\ndata: line one\ndata: line two\n\n"
        );
    }

    #[test]
    fn keep_alive_is_ping_event() {
        let encoded = SseFrame::keep_alive().encode();
        assert!(encoded.starts_with("event: ping\n"));
        assert!(encoded.ends_with("\n\n"));
    }

    #[test]
    fn parse_round_trip() {
        let frame = SseFrame::event("42", "message", "alpha\nbeta");
        let parsed = SseFrame::parse(&frame.encode()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn parse_skips_comments() {
        let parsed = SseFrame::parse(": keep-alive\nid: 1\ndata: x\n\n").unwrap();
        assert_eq!(parsed.id.as_deref(), Some("1"));
        assert_eq!(parsed.data, "x");
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(SseFrame::parse("\n\n").is_err());
    }
}
