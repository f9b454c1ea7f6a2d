//! Input validation utilities.
//!
//! Centralized validation helpers used across API routes.

use validator::Validate;

use crate::error::NexusError;

/// Validate a request body, returning a NexusError::InvalidInput on failure.
pub fn validate_request<T: Validate>(body: &T) -> Result<(), NexusError> {
    body.validate().map_err(|e| NexusError::InvalidInput {
        message: format_validation_errors(e),
    })
}

/// Format validation errors into a human-readable string.
fn format_validation_errors(errors: validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for '{field}'"))
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate that a string is a safe device name (no control characters, not
/// empty, reasonable length).
pub fn validate_device_name(name: &str) -> Result<(), NexusError> {
    if name.trim().is_empty() {
        return Err(NexusError::InvalidInput {
            message: "Device name cannot be empty or whitespace only".into(),
        });
    }
    if name.chars().count() > 100 {
        return Err(NexusError::InvalidInput {
            message: "Device name too long".into(),
        });
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(NexusError::InvalidInput {
            message: "Device name cannot contain control characters".into(),
        });
    }
    Ok(())
}
