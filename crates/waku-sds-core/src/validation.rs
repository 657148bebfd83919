//! Structural checks for messages entering local history.

use crate::error::ValidationError;
use crate::message::ContentMessage;

/// Validate a content message before it is stored.
///
/// This checks:
/// - Non-empty message id
/// - Non-empty channel id
/// - Non-empty content
pub fn validate_content_message(message: &ContentMessage) -> Result<(), ValidationError> {
    if message.message_id.is_empty() {
        return Err(ValidationError::EmptyMessageId);
    }

    if message.channel_id.is_empty() {
        return Err(ValidationError::EmptyChannelId);
    }

    if message.content.is_empty() {
        return Err(ValidationError::EmptyContent(
            message.message_id.as_str().to_owned(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelId, MessageId, SenderId};

    fn message(id: &str, channel: &str, content: &[u8]) -> ContentMessage {
        ContentMessage::new(
            MessageId::from(id),
            ChannelId::from(channel),
            SenderId::from("s"),
            1,
            content.to_vec(),
        )
    }

    #[test]
    fn test_valid_message() {
        assert!(validate_content_message(&message("m", "c", b"x")).is_ok());
    }

    #[test]
    fn test_empty_fields() {
        assert_eq!(
            validate_content_message(&message("", "c", b"x")),
            Err(ValidationError::EmptyMessageId)
        );
        assert_eq!(
            validate_content_message(&message("m", "", b"x")),
            Err(ValidationError::EmptyChannelId)
        );
        assert_eq!(
            validate_content_message(&message("m", "c", b"")),
            Err(ValidationError::EmptyContent("m".into()))
        );
    }
}
