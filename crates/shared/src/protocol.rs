use serde::{Deserialize, Serialize};

use crate::domain::SearchBudget;

/// Body of `POST /ask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub enable_multi_hop: bool,
    pub search_budget: SearchBudget,
}

/// One event of the `/ask` answer stream, as carried in a `data:` frame.
///
/// Fields beyond the ones named here are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Pre-rendered reasoning log markup.
    LogHtml { content: String },
    Answer { content: String },
    Error { content: String },
    Finished,
}

/// Body of the `/upload_image` response, for both success and failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadImageResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmented_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_info: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
