//! Validation of store-relative entry names.

use crate::{PassError, Result};
use std::path::{Component, Path};

/// Maximum allowed length for entry names.
const MAX_NAME_LENGTH: usize = 255;

/// Validates a store-relative entry name.
///
/// Entry names are joined onto the store root, so they must not be able to
/// escape it. This rejects:
/// - Empty names
/// - Excessive length (>255 bytes)
/// - Null bytes and control characters
/// - Absolute paths
/// - `..` components
///
/// # Errors
///
/// Returns [`PassError::InvalidName`] if validation fails.
///
/// # Example
///
/// ```
/// use passmux::validation::validate_entry_name;
///
/// assert!(validate_entry_name("web/mail.example.com").is_ok());
/// assert!(validate_entry_name("bank").is_ok());
///
/// assert!(validate_entry_name("").is_err());
/// assert!(validate_entry_name("../outside").is_err());
/// assert!(validate_entry_name("/etc/passwd").is_err());
/// ```
pub fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PassError::InvalidName("name cannot be empty".to_string()));
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(PassError::InvalidName(format!(
            "name exceeds maximum length of {} characters",
            MAX_NAME_LENGTH
        )));
    }

    if name.contains('\0') {
        return Err(PassError::InvalidName("name contains null byte".to_string()));
    }

    if name.chars().any(char::is_control) {
        return Err(PassError::InvalidName(
            "name contains control characters".to_string(),
        ));
    }

    for component in Path::new(name).components() {
        match component {
            Component::ParentDir => {
                return Err(PassError::InvalidName(format!(
                    "name escapes the store: {}",
                    name
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PassError::InvalidName(format!(
                    "name must be relative to the store: {}",
                    name
                )))
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_entry_name("my-secret").is_ok());
        assert!(validate_entry_name("API_KEY_123").is_ok());
        assert!(validate_entry_name("user@example.com").is_ok());
        assert!(validate_entry_name("path/to/secret").is_ok());
        assert!(validate_entry_name("spaces are fine").is_ok());
    }

    #[test]
    fn test_empty_name() {
        let result = validate_entry_name("");
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_too_long() {
        let result = validate_entry_name(&"a".repeat(256));
        assert!(result.unwrap_err().to_string().contains("maximum length"));
    }

    #[test]
    fn test_null_byte() {
        let result = validate_entry_name("name\0with\0nulls");
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_control_characters() {
        let result = validate_entry_name("name\nnewline");
        assert!(result.unwrap_err().to_string().contains("control"));
    }

    #[test]
    fn test_escape_attempts() {
        for name in ["..", "../x", "a/../../x", "/abs"] {
            assert!(
                validate_entry_name(name).is_err(),
                "Expected '{}' to fail validation",
                name
            );
        }
    }
}
