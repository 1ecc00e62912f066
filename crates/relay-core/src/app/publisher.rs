//! Publisher - build, persist, publish, record.
//!
//! # Flow
//! 1. Mint a message id and build the envelope
//! 2. Serialize it (nothing is persisted if this fails)
//! 3. Persist the task as Pending (the send aborts if this fails)
//! 4. Publish through the ConnectionManager under `publish_timeout`
//! 5. Record Delivered or Failed
//!
//! Every path after step 3 surfaces the publish outcome. The follow-up
//! store write is best-effort: if it fails the error is logged, so a send
//! the broker already accepted is never reported as failed. Such a task
//! stays Pending in the store.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use super::connection::ConnectionManager;
use crate::domain::{DispatchError, MessageEnvelope, MessageId, Task};
use crate::ports::{Clock, IdGenerator, PublishProperties, TaskStore};

pub struct Publisher {
    connection: Arc<ConnectionManager>,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    publish_timeout: Duration,
}

impl Publisher {
    pub fn new(
        connection: Arc<ConnectionManager>,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            store,
            clock,
            ids,
            publish_timeout,
        }
    }

    pub async fn send<B: Serialize + ?Sized>(
        &self,
        message_type: &str,
        body: &B,
        needs_ack: bool,
    ) -> Result<MessageId, DispatchError> {
        let topology = self.connection.topology();
        let message_id = self.ids.generate_message_id();
        let created_at = self.clock.now();

        let envelope = MessageEnvelope::with_body(
            message_id,
            message_type,
            created_at,
            topology.sent_by(),
            body,
            needs_ack,
        )?;
        let payload = envelope.encode_to_string()?;

        let mut task = Task::pending(&envelope, payload, topology.queue_name(), created_at);
        self.store.create_task(&mut task).await?;

        let properties = PublishProperties::json(message_id.to_string(), created_at);
        let published = self
            .connection
            .publish(task.payload.as_bytes(), properties, self.publish_timeout)
            .await;

        match published {
            Ok(()) => {
                self.record_delivered(&mut task).await;
                info!(
                    message_id = %message_id,
                    message_type,
                    queue = %topology.queue_name(),
                    "message sent"
                );
                Ok(message_id)
            }
            Err(err) => {
                warn!(
                    message_id = %message_id,
                    message_type,
                    error = %err,
                    "message publish failed"
                );
                self.record_failed(&mut task, &err).await;
                Err(err)
            }
        }
    }

    async fn record_delivered(&self, task: &mut Task) {
        if let Err(e) = task.mark_delivered(self.clock.now()) {
            error!(message_id = %task.message_id, error = %e, "cannot mark task delivered");
            return;
        }
        if let Err(e) = self.store.update_task(task).await {
            error!(
                message_id = %task.message_id,
                error = %e,
                "failed to update task status to delivered"
            );
        }
    }

    async fn record_failed(&self, task: &mut Task, cause: &DispatchError) {
        if let Err(e) = task.mark_failed(cause.to_string(), self.clock.now()) {
            error!(message_id = %task.message_id, error = %e, "cannot mark task failed");
            return;
        }
        if let Err(e) = self.store.update_task(task).await {
            error!(
                message_id = %task.message_id,
                error = %e,
                "failed to update task status to failed"
            );
        }
    }
}
