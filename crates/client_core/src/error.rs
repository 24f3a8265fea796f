use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the backend. The display text is what ends up in the
/// transcript, so it is phrased for the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Error: {status}. {detail}")]
    Status { status: StatusCode, detail: String },
    #[error("Failed to send request: {0}")]
    Network(String),
    #[error("Stream reading error: {0}")]
    Stream(String),
    #[error("Invalid server response: {0}")]
    Decode(String),
    #[error("Failed to read image {path}: {reason}")]
    ReadFile { path: String, reason: String },
    #[error("invalid transport configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a question is already being answered")]
    SessionActive,
    #[error("question must not be empty")]
    EmptyQuestion,
}
