//! Runtime errors and the per-device error topic

use tb2m_proxy::ProxyError;
use thiserror::Error;

/// Longest payload published on the error topic
pub const MAX_ERROR_LEN: usize = 255;

/// Bytes of the message kept when it has to be cut
const TRUNCATED_LEN: usize = 251;

const ELLIPSIS: &str = "...";

/// Payload published when the error is cleared
pub const CLEARED: &str = "null";

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("failed to get {step}: {source}")]
    Fetch {
        step: &'static str,
        #[source]
        source: ProxyError,
    },
    #[error("no handler for command `{0}`")]
    UnresolvedCommand(String),
    #[error("{0}")]
    Command(#[source] ProxyError),
    #[error("poll loop stopped")]
    PollStopped,
    #[error("inbound queue closed")]
    InboundClosed,
}

/// Cut a message to [`MAX_ERROR_LEN`] bytes on a character boundary
pub fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = TRUNCATED_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &message[..end], ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_unchanged() {
        assert_eq!(truncate_error("boom"), "boom");
        let exact = "x".repeat(255);
        assert_eq!(truncate_error(&exact), exact);
    }

    #[test]
    fn test_long_message_truncated() {
        let long = "x".repeat(300);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.len(), 254);
        assert!(truncated.ends_with("x..."));
        assert_eq!(&truncated[..251], &long[..251]);
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        // 250 ASCII bytes followed by 2-byte characters: byte 251 is inside one
        let long = format!("{}{}", "a".repeat(250), "é".repeat(20));
        let truncated = truncate_error(&long);
        assert!(truncated.len() <= MAX_ERROR_LEN);
        assert_eq!(truncated, format!("{}...", "a".repeat(250)));
    }

    #[test]
    fn test_error_messages() {
        let err = RuntimeError::Fetch {
            step: "connection status",
            source: ProxyError::Rejected("boom".to_string()),
        };
        assert_eq!(err.to_string(), "failed to get connection status: command failed: boom");
        assert_eq!(
            RuntimeError::UnresolvedCommand("FOO".to_string()).to_string(),
            "no handler for command `FOO`"
        );
    }
}
