// src/bot/error.rs - Rule compilation and evaluation errors

use thiserror::Error;

use crate::bot::modifiers::MatchMode;

/// Everything that can go wrong while compiling a rule or running it
/// against a message. All of these are terminal for one rule or one
/// action and never for the whole rule set.
#[derive(Error, Debug)]
pub enum ConditionError {
    #[error("Required property missing: {0}")]
    MissingRequiredProperty(String),

    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    #[error("{field} must be {expected}, but got {actual}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: String,
    },

    #[error("Invalid modifier: {0}")]
    InvalidModifier(String),

    #[error("Multiple match modifiers found ({}), please only use **one** of the following modifiers:\n`{}`", .0.join(", "), MatchMode::names().join(", "))]
    MultipleMatchModifiers(Vec<String>),

    #[error("At least 1 action is required")]
    NoActionSpecified,

    #[error("The reply action requires a `reply` text")]
    MissingReplyText,

    #[error("Invalid message pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Role not found: {0}")]
    RoleNotResolved(String),
}

impl ConditionError {
    /// Build a type mismatch using a short rendering of the offending value
    pub fn type_mismatch(field: &str, expected: &'static str, actual: &serde_yaml::Value) -> Self {
        ConditionError::TypeMismatch {
            field: field.to_string(),
            expected,
            actual: describe_value(actual),
        }
    }
}

/// "string (foo)", "sequence ([a, b])" and so on, for error messages
pub fn describe_value(value: &serde_yaml::Value) -> String {
    use serde_yaml::Value;

    let kind = match value {
        Value::Null => return "null".to_string(),
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    };

    let rendered = serde_json::to_string(value).unwrap_or_else(|_| format!("{:?}", value));
    format!("{} ({})", kind, rendered)
}
