use std::fmt::Display;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct StoryForgeError {
    pub code: String,
    pub message: String,
}

impl StoryForgeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn from_display(code: &'static str, error: impl Display) -> Self {
        Self::new(code, error.to_string())
    }
}

pub fn map_json(error: serde_json::Error) -> StoryForgeError {
    StoryForgeError::from_display("JSON_INVALID", error)
}

pub fn map_store_io(error: std::io::Error) -> StoryForgeError {
    StoryForgeError::from_display("STORE_IO", error)
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn display_joins_code_and_message() {
        let error = StoryForgeError::new("RUNTIME_NOT_LOADED", "No bundle is loaded.");
        assert_eq!(error.to_string(), "RUNTIME_NOT_LOADED: No bundle is loaded.");
    }

    #[test]
    fn mapping_helpers_keep_error_codes() {
        let invalid = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
        assert_eq!(map_json(invalid).code, "JSON_INVALID");
        assert_eq!(map_store_io(std::io::Error::other("disk")).code, "STORE_IO");
    }
}
