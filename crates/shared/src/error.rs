use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the backend for rejected requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown search budget '{0}' (expected Deeper or Deep)")]
pub struct UnknownSearchBudget(pub String);
