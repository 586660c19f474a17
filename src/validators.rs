/// Input validators
/// Features:
/// 1. Length limits on every free-text field
/// 2. Rejection of control characters in identifiers
///
/// Validators return the normalized (trimmed) value on success.

use crate::error::ValidationError;

pub const MAX_USERNAME_LENGTH: usize = 64;
pub const MAX_TODO_VALUE_LENGTH: usize = 1000;

/// Validates a username
/// - Trims surrounding whitespace
/// - Requires 1 to 64 characters
/// - Rejects control characters (including null bytes)
pub fn is_valid_username(username: &str) -> Result<String, ValidationError> {
    let trimmed = username.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("username".to_string()));
    }

    if trimmed.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::TooLong(
            "username".to_string(),
            MAX_USERNAME_LENGTH,
        ));
    }

    if trimmed.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidFormat("username".to_string()));
    }

    Ok(trimmed.to_string())
}

/// Validates the text of a todo item
pub fn is_valid_todo_value(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("value".to_string()));
    }

    if trimmed.chars().count() > MAX_TODO_VALUE_LENGTH {
        return Err(ValidationError::TooLong(
            "value".to_string(),
            MAX_TODO_VALUE_LENGTH,
        ));
    }

    Ok(trimmed.to_string())
}
