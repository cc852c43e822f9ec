//! Result envelope for application actions.
//!
//! Action handlers return [`ActionResult`] instead of raw errors so that
//! internal detail (key paths, ciphertext, backend messages) reaches the
//! log and never the user.

use serde::Serialize;
use tracing::error;

use crate::error::Error;

/// Outcome of a user-facing action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResult<T = ()> {
    /// Whether the action succeeded
    pub success: bool,
    /// Short message safe to show to the user
    pub message: String,
    /// Payload of a successful action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ActionResult<T> {
    /// Successful result carrying `data`.
    #[must_use]
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self { success: true, message: message.into(), data: Some(data) }
    }

    /// Failed result for `err`, logging the full error chain.
    ///
    /// `action` names what was attempted and `subject` what it acted on,
    /// e.g. `"update allergies"` and `"resident"`.
    #[must_use]
    pub fn from_error(action: &str, subject: &str, err: &Error) -> Self {
        error!(action, error = %err, "action failed");
        Self { success: false, message: user_message(subject, err), data: None }
    }

    /// Converts an operation result into an action result.
    #[must_use]
    pub fn from_result(
        action: &str,
        subject: &str,
        success_message: &str,
        result: Result<T, Error>,
    ) -> Self {
        match result {
            Ok(data) => Self::ok(success_message, data),
            Err(err) => Self::from_error(action, subject, &err),
        }
    }
}

/// Maps an error to a message that reveals no key or storage detail.
#[must_use]
pub fn user_message(subject: &str, err: &Error) -> String {
    if err.is_key_failure() {
        return "Could not access protected data. Contact your administrator.".to_string();
    }
    match err.root() {
        Error::NotFound(_) => format!("{} not found.", capitalize(subject)),
        Error::AlreadyExists(_) => format!("{} already exists.", capitalize(subject)),
        Error::SchemaViolation(_) => format!("The {subject} data is invalid."),
        Error::Storage(_) => "The record could not be saved. Please try again.".to_string(),
        _ => "Something went wrong. Please try again.".to_string(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
