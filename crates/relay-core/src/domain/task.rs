//! Task: the durable record of one send attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::MessageEnvelope;
use super::errors::DispatchError;
use super::ids::{MessageId, TaskRecordId};
use super::state::MessageStatus;

/// Delivery-tracking record for one message.
///
/// Design:
/// - Created Pending before anything touches the network.
/// - All status changes go through the `mark_*` methods, which refuse to
///   move backwards.
/// - `retry_count` / `next_retry_time` are carried for a future retry
///   subsystem; nothing here drives them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Assigned by the store on create.
    pub id: Option<TaskRecordId>,
    pub message_id: MessageId,
    pub message_type: String,
    /// The sending instance's own queue, not the destination.
    pub queue_name: String,
    pub status: MessageStatus,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Serialized envelope.
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub sent_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A Pending task for an envelope about to be published.
    pub fn pending(
        envelope: &MessageEnvelope,
        payload: String,
        queue_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            message_id: envelope.message_id,
            message_type: envelope.message_type.clone(),
            queue_name: queue_name.into(),
            status: MessageStatus::Pending,
            retry_count: 0,
            next_retry_time: None,
            error: None,
            payload,
            result: None,
            sent_by: envelope.sent_by.clone(),
            acked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: MessageStatus, now: DateTime<Utc>) -> Result<(), DispatchError> {
        if !self.status.can_transition_to(next) {
            return Err(DispatchError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> Result<(), DispatchError> {
        self.transition(MessageStatus::Delivered, now)
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), DispatchError> {
        self.transition(MessageStatus::Failed, now)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Record the completion receipt. `result` is already serialized.
    pub fn mark_acknowledged(
        &mut self,
        result: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        self.transition(MessageStatus::Acknowledged, now)?;
        if result.is_some() {
            self.result = result;
        }
        self.acked_at = Some(now);
        Ok(())
    }

    /// Decode the stored payload back into its envelope.
    pub fn envelope(&self) -> Result<MessageEnvelope, DispatchError> {
        MessageEnvelope::decode(self.payload.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use ulid::Ulid;

    fn pending_task() -> Task {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let envelope = MessageEnvelope::with_body(
            MessageId::from_ulid(Ulid::new()),
            "welcome_email",
            now,
            "host-inst-1",
            &json!({ "user_id": 42 }),
            true,
        )
        .unwrap();
        let payload = String::from_utf8(envelope.encode().unwrap()).unwrap();
        Task::pending(&envelope, payload, "platform-host-inst-1", now)
    }

    #[test]
    fn pending_task_copies_envelope_identity() {
        let task = pending_task();
        assert_eq!(task.status, MessageStatus::Pending);
        assert_eq!(task.message_type, "welcome_email");
        assert_eq!(task.sent_by, "host-inst-1");
        assert_eq!(task.retry_count, 0);
        assert!(task.error.is_none());
        assert_eq!(task.envelope().unwrap().message_id, task.message_id);
    }

    #[test]
    fn failed_records_error_text() {
        let mut task = pending_task();
        let later = task.created_at + Duration::seconds(1);
        task.mark_failed("connection refused", later).unwrap();

        assert_eq!(task.status, MessageStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("connection refused"));
        assert_eq!(task.updated_at, later);
    }

    #[test]
    fn acknowledge_after_delivery() {
        let mut task = pending_task();
        let now = task.created_at;
        task.mark_delivered(now).unwrap();
        task.mark_acknowledged(Some("{\"status\":\"sent\"}".into()), now)
            .unwrap();

        assert_eq!(task.status, MessageStatus::Acknowledged);
        assert_eq!(task.acked_at, Some(now));
        assert_eq!(task.result.as_deref(), Some("{\"status\":\"sent\"}"));
    }

    #[test]
    fn failed_task_cannot_be_acknowledged() {
        let mut task = pending_task();
        let now = task.created_at;
        task.mark_failed("boom", now).unwrap();

        let err = task.mark_acknowledged(None, now).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InvalidTransition {
                from: MessageStatus::Failed,
                to: MessageStatus::Acknowledged
            }
        ));
        assert!(task.acked_at.is_none());
    }

    #[test]
    fn delivered_cannot_fall_back_to_failed() {
        let mut task = pending_task();
        let now = task.created_at;
        task.mark_delivered(now).unwrap();
        assert!(task.mark_failed("late", now).is_err());
        assert!(task.error.is_none());
    }
}
