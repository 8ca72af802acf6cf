//! Capability catalog error types.

use thiserror::Error;

use super::types::ToolOrigin;

/// Errors raised while registering, resolving, or validating tools.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    /// The name is already owned by a different origin.
    #[error("tool name '{name}' is already claimed by {existing}; registration from {attempted} rejected")]
    NameCollision {
        name: String,
        existing: ToolOrigin,
        attempted: ToolOrigin,
    },

    /// No tool with this name is registered.
    #[error("unknown tool: '{name}'{}", suggestion_suffix(.suggestions))]
    UnknownTool {
        name: String,
        suggestions: Vec<String>,
    },

    /// A provider advertised the same name more than once in one announcement.
    #[error("provider '{provider}' advertised tool '{name}' more than once")]
    DuplicateInAnnouncement { provider: String, name: String },

    /// A descriptor was handed to the wrong registration path.
    #[error("tool '{name}' has origin {declared} but was registered as {attempted}")]
    OriginMismatch {
        name: String,
        declared: ToolOrigin,
        attempted: ToolOrigin,
    },

    /// The advertised input schema could not be understood.
    #[error("invalid input schema for '{tool}': {reason}")]
    InvalidSchema { tool: String, reason: String },

    /// Call arguments do not satisfy the tool's input schema.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}

fn suggestion_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {})", suggestions.join(", "))
    }
}
