//! Wire format of the chat streaming endpoint.
//!
//! The response body is a sequence of blocks separated by a blank line, each
//! block being `data: <json>`. Network reads can end anywhere, including in
//! the middle of a JSON payload or a multi-byte UTF-8 character, so
//! [`FrameDecoder`] keeps the unconsumed tail between reads and only ever
//! hands out complete blocks.

use serde::Deserialize;
use tracing::debug;

use crate::error::ReviewError;

/// Maximum number of follow-up questions kept from a single payload.
pub const MAX_FOLLOW_UPS: usize = 3;

// ---------------------------------------------------------------------------
// Frame splitting
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FrameDecoder {
    tail: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read; returns every block it completed, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        // CR is never meaningful inside a block, so dropping it normalises
        // CRLF framing without special cases in the search below.
        self.tail.extend(bytes.iter().copied().filter(|&b| b != b'\r'));

        let mut blocks = Vec::new();
        let mut start = 0;
        while let Some(pos) = find_separator(&self.tail[start..]) {
            let end = start + pos;
            blocks.push(String::from_utf8_lossy(&self.tail[start..end]).into_owned());
            start = end + 2;
        }
        self.tail.drain(..start);
        blocks
    }

    /// Flush whatever is left at end of stream. A trailing block without the
    /// blank-line terminator is still a block.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.tail);
        let text = String::from_utf8_lossy(&rest);
        if text.trim().is_empty() {
            None
        } else {
            Some(text.into_owned())
        }
    }

    /// Bytes buffered but not yet part of a complete block.
    pub fn pending(&self) -> usize {
        self.tail.len()
    }
}

fn find_separator(haystack: &[u8]) -> Option<usize> {
    haystack.windows(2).position(|w| w == b"\n\n")
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Connection acknowledged.
    Init { message: Option<String> },
    /// Incremental text to append.
    Message { content: String },
    FollowUp { questions: Vec<String> },
    /// End of turn, optionally carrying follow-ups.
    Complete { follow_up_questions: Vec<String> },
    Error { error: String },
    Unknown { kind: String },
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    follow_up_questions: Option<Vec<String>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: Option<bool>,
}

/// Decode one block.
///
/// `Ok(None)` for blocks that carry no `data:` line (comments, keep-alives,
/// empty blocks). `Err(MalformedFrame)` when the payload is not a JSON object
/// of the expected shape; callers skip such frames and keep reading.
pub fn parse_frame(block: &str) -> Result<Option<ChatEvent>, ReviewError> {
    let data: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if data.is_empty() {
        return Ok(None);
    }
    let json = data.join("\n");
    let json = json.trim();
    if json.is_empty() {
        return Ok(None);
    }

    let raw: RawPayload = serde_json::from_str(json).map_err(|e| ReviewError::MalformedFrame {
        detail: format!("{} in {:?}", e, truncate(json, 80)),
    })?;
    Ok(Some(raw.into_event()))
}

impl RawPayload {
    fn into_event(self) -> ChatEvent {
        if self.done == Some(true) {
            return ChatEvent::Complete {
                follow_up_questions: self.follow_up_questions.unwrap_or_default(),
            };
        }
        match self.kind.as_deref() {
            Some("init") => ChatEvent::Init { message: self.message },
            Some("message") => ChatEvent::Message {
                content: self.content.unwrap_or_default(),
            },
            Some("follow_up") => ChatEvent::FollowUp {
                questions: self.follow_up_questions.unwrap_or_default(),
            },
            Some("complete") => ChatEvent::Complete {
                follow_up_questions: self.follow_up_questions.unwrap_or_default(),
            },
            Some("error") => ChatEvent::Error {
                error: self.error.or(self.message).unwrap_or_else(|| "unknown error".to_string()),
            },
            other => {
                let kind = other.unwrap_or("").to_string();
                debug!(%kind, "unrecognised stream event");
                ChatEvent::Unknown { kind }
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// First [`MAX_FOLLOW_UPS`] non-blank questions, in original order.
pub fn limit_follow_ups(questions: &[String]) -> Vec<String> {
    questions
        .iter()
        .filter(|q| !q.trim().is_empty())
        .take(MAX_FOLLOW_UPS)
        .cloned()
        .collect()
}
