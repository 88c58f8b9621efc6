//! Tool call result types

use serde::{Deserialize, Serialize};

use super::schema::ValidationFailure;
use crate::error::Error;

/// One block of tool output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        ToolContent {
            content_type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Result of a tool call, as returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    /// Create a failed result
    pub fn failure(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::text(text)],
            is_error: true,
        }
    }

    /// Arguments failed their contract
    pub fn validation_error(failure: &ValidationFailure) -> Self {
        Self::failure(format!("Validation Error: {}", failure))
    }

    /// The remote server or the transport to it failed
    pub fn api_error(context: &str, error: &Error) -> Self {
        Self::failure(format!("API Error ({}): {}", context, error))
    }

    /// Anything else that went wrong
    pub fn error(context: &str, message: impl std::fmt::Display) -> Self {
        Self::failure(format!("Error ({}): {}", context, message))
    }

    /// Map a failed operation onto its category
    pub fn from_error(context: &str, error: &Error) -> Self {
        match error {
            Error::Validation(failure) => Self::validation_error(failure),
            e if e.is_api_error() => Self::api_error(context, e),
            e => Self::error(context, e),
        }
    }

    /// All text blocks joined
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
