use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::UnknownSearchBudget;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);
    };
}

id_newtype!(MessageId);

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Error,
}

/// Bounds how much graph exploration the backend performs per question.
///
/// Sent by variant name (`"Deeper"`, `"Deep"`), which is what the backend matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SearchBudget {
    #[default]
    Deeper,
    Deep,
}

impl SearchBudget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deeper => "Deeper",
            Self::Deep => "Deep",
        }
    }
}

impl fmt::Display for SearchBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchBudget {
    type Err = UnknownSearchBudget;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "deeper" => Ok(Self::Deeper),
            "deep" => Ok(Self::Deep),
            _ => Err(UnknownSearchBudget(raw.to_string())),
        }
    }
}

/// Image extensions the segmentation endpoint accepts.
pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff"];

pub fn is_supported_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
