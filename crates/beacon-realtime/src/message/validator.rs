//! Message validation rules.

use beacon_core::error::AppError;

/// Maximum channel name length.
const MAX_CHANNEL_LEN: usize = 256;

/// Validates a raw inbound frame.
pub fn validate_inbound(raw: &str, max_bytes: usize) -> Result<(), AppError> {
    if raw.len() > max_bytes {
        return Err(AppError::validation(format!(
            "Message exceeds maximum size of {max_bytes} bytes"
        )));
    }

    if raw.trim().is_empty() {
        return Err(AppError::validation("Empty message"));
    }

    Ok(())
}

/// Validates channel name format.
pub fn validate_channel_name(channel: &str) -> Result<(), AppError> {
    if channel.is_empty() || channel.len() > MAX_CHANNEL_LEN {
        return Err(AppError::validation("Invalid channel name length"));
    }

    if !channel
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ':' | '-' | '_' | '.'))
    {
        return Err(AppError::validation(
            "Channel name contains invalid characters",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert!(validate_channel_name("chat:room1").is_ok());
        assert!(validate_channel_name("team.alpha_2-b").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("chat room").is_err());
        assert!(validate_channel_name("chat:*").is_err());
        assert!(validate_channel_name(&"x".repeat(257)).is_err());
    }

    #[test]
    fn test_inbound_limits() {
        assert!(validate_inbound("{}", 16).is_ok());
        assert!(validate_inbound("   ", 16).is_err());
        assert!(validate_inbound(&"x".repeat(17), 16).is_err());
    }
}
