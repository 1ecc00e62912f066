//! Delivery status of a task.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one send attempt.
///
/// State transitions:
/// - Pending -> Delivered -> Acknowledged
/// - Pending -> Failed
/// - Pending -> Acknowledged (receipt arrived for a send whose follow-up
///   store write was lost)
///
/// Failed and Acknowledged are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Persisted, publish not yet resolved.
    Pending,

    /// Accepted by the broker.
    Delivered,

    /// Connect or publish failed.
    Failed,

    /// Completion receipt recorded.
    Acknowledged,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 4] = [
        MessageStatus::Pending,
        MessageStatus::Delivered,
        MessageStatus::Failed,
        MessageStatus::Acknowledged,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Failed | MessageStatus::Acknowledged)
    }

    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, Delivered) | (Pending, Failed) | (Pending, Acknowledged) | (Delivered, Acknowledged)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
            MessageStatus::Acknowledged => "acknowledged",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::delivered(MessageStatus::Pending, MessageStatus::Delivered)]
    #[case::failed(MessageStatus::Pending, MessageStatus::Failed)]
    #[case::late_receipt(MessageStatus::Pending, MessageStatus::Acknowledged)]
    #[case::acked(MessageStatus::Delivered, MessageStatus::Acknowledged)]
    fn forward_transitions_are_allowed(#[case] from: MessageStatus, #[case] to: MessageStatus) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::back_to_pending(MessageStatus::Delivered, MessageStatus::Pending)]
    #[case::delivered_fails(MessageStatus::Delivered, MessageStatus::Failed)]
    #[case::failed_is_terminal(MessageStatus::Failed, MessageStatus::Pending)]
    #[case::failed_cannot_ack(MessageStatus::Failed, MessageStatus::Acknowledged)]
    #[case::double_ack(MessageStatus::Acknowledged, MessageStatus::Acknowledged)]
    #[case::self_loop(MessageStatus::Pending, MessageStatus::Pending)]
    fn backward_or_terminal_transitions_are_rejected(
        #[case] from: MessageStatus,
        #[case] to: MessageStatus,
    ) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&MessageStatus::Acknowledged).unwrap();
        assert_eq!(json, "\"acknowledged\"");
        for status in MessageStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!MessageStatus::Pending.is_terminal());
        assert!(!MessageStatus::Delivered.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(MessageStatus::Acknowledged.is_terminal());
    }
}
