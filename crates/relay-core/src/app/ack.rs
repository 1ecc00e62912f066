//! Application-level acknowledgement.
//!
//! A consumer reports back that it finished a message. This only changes
//! the task record; the broker-level ack on the delivery is unaffected.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::domain::{DispatchError, MessageId};
use crate::ports::{Clock, StoreError, TaskStore};

pub struct AckHandler {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl AckHandler {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Mark the task for `message_id` Acknowledged, storing `result` as JSON
    /// text when given.
    ///
    /// A non-finite float inside `result` is stored as `null`, as in
    /// `MessageEnvelope::with_body`.
    ///
    /// Allowed from Pending or Delivered. A Failed or already Acknowledged
    /// task is rejected with `InvalidTransition` and left untouched.
    pub async fn ack<R: Serialize + ?Sized>(
        &self,
        message_id: &MessageId,
        result: Option<&R>,
    ) -> Result<(), DispatchError> {
        let mut task = match self.store.get_task_by_message_id(message_id).await {
            Ok(task) => task,
            Err(StoreError::NotFound(_)) => return Err(DispatchError::NotFound(*message_id)),
            Err(e) => return Err(e.into()),
        };

        let result = result.map(|r| serde_json::to_string(r)).transpose()?;
        let previous = task.status;
        task.mark_acknowledged(result, self.clock.now())?;
        self.store.update_task(&task).await?;

        info!(message_id = %message_id, from = %previous, "message acknowledged");
        Ok(())
    }
}
