//! Frame payload decoding into typed stream events.

use shared::protocol::ServerEvent;
use tracing::debug;

pub const DATA_PREFIX: &str = "data:";

/// A decoded event from the answer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Reasoning log markup, rendered as-is in the log panel.
    LogEntry(String),
    Answer(String),
    Error(String),
    Finished,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Finished)
    }
}

impl From<ServerEvent> for StreamEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::LogHtml { content } => Self::LogEntry(content),
            ServerEvent::Answer { content } => Self::Answer(content),
            ServerEvent::Error { content } => Self::Error(content),
            ServerEvent::Finished => Self::Finished,
        }
    }
}

/// Parses one frame. Anything that is not a `data:` frame carrying a known
/// event type yields `None`.
pub fn parse_frame(frame: &str) -> Option<StreamEvent> {
    let first_line = frame.lines().next()?;
    if !first_line.starts_with(DATA_PREFIX) {
        debug!(frame, "dropping frame without data prefix");
        return None;
    }

    let payload = frame
        .lines()
        .filter_map(|line| line.strip_prefix(DATA_PREFIX))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect::<Vec<_>>()
        .join("\n");

    match serde_json::from_str::<ServerEvent>(&payload) {
        Ok(event) => Some(event.into()),
        Err(err) => {
            debug!(error = %err, payload = %payload, "dropping malformed stream frame");
            None
        }
    }
}
