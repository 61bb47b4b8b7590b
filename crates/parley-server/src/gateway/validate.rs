//! Structural validation. Nothing here touches storage.

use parley_shared::constants::{GENERAL_CHANNEL_NAME, MAX_MESSAGE_LEN, MAX_NAME_LEN};

use crate::error::{GatewayError, Result};

/// Longest accepted client idempotency key.
const MAX_CLIENT_KEY_LEN: usize = 128;

pub(crate) fn required(value: &str, field: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::invalid(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn name(value: &str, field: &str) -> Result<String> {
    let trimmed = required(value, field)?;
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(GatewayError::invalid(format!(
            "{field} exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed)
}

/// Channel names may not take the reserved name of the protected channel.
pub(crate) fn channel_name(value: &str) -> Result<String> {
    let name = name(value, "channel name")?;
    if name == GENERAL_CHANNEL_NAME {
        return Err(GatewayError::invalid("channel name 'general' is reserved"));
    }
    Ok(name)
}

pub(crate) fn content(value: &str) -> Result<String> {
    let trimmed = required(value, "content")?;
    if trimmed.chars().count() > MAX_MESSAGE_LEN {
        return Err(GatewayError::invalid(format!(
            "content exceeds {MAX_MESSAGE_LEN} characters"
        )));
    }
    Ok(trimmed)
}

pub(crate) fn optional_content(value: Option<&str>) -> Result<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => content(v).map(Some),
    }
}

pub(crate) fn client_key(value: Option<&str>) -> Result<Option<String>> {
    match value.map(str::trim) {
        None => Ok(None),
        Some("") => Err(GatewayError::invalid("client_key must not be empty")),
        Some(k) if k.len() > MAX_CLIENT_KEY_LEN => Err(GatewayError::invalid("client_key is too long")),
        Some(k) => Ok(Some(k.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(name("  Test ", "name").unwrap(), "Test");
        assert!(name("   ", "name").is_err());
        assert!(name(&"x".repeat(101), "name").is_err());
        assert!(name(&"x".repeat(100), "name").is_ok());
    }

    #[test]
    fn general_is_reserved() {
        assert!(channel_name("general").is_err());
        assert!(channel_name("General").is_ok());
    }

    #[test]
    fn content_bounds() {
        assert!(content(&"a".repeat(4000)).is_ok());
        assert!(content(&"a".repeat(4001)).is_err());
        assert_eq!(optional_content(Some("   ")).unwrap(), None);
    }

    #[test]
    fn client_keys() {
        assert_eq!(client_key(None).unwrap(), None);
        assert!(client_key(Some(" ")).is_err());
        assert_eq!(client_key(Some("k1")).unwrap().as_deref(), Some("k1"));
    }
}
