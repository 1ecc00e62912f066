//! Dispatcher - the public surface of one messaging instance.
//!
//! Owns the instance's broker connection, its reconnect supervisor, and
//! the task store handle. Built by `DispatcherBuilder` in the composition
//! root and shared by reference (usually `Arc<Dispatcher>`); there is no
//! process-wide instance.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::ack::AckHandler;
use super::connection::{ConnectionManager, ConnectionState};
use super::publisher::Publisher;
use super::status::{DispatcherStatus, StatusCounts};
use super::supervisor::ReconnectSupervisor;
use crate::domain::{DispatchError, InstanceId, MessageId, MessageStatus, Task};
use crate::ports::{StoreError, TaskStore};

pub struct Dispatcher {
    instance_id: InstanceId,
    connection: Arc<ConnectionManager>,
    store: Arc<dyn TaskStore>,
    publisher: Publisher,
    acks: AckHandler,
    supervisor: Mutex<Option<ReconnectSupervisor>>,
}

impl Dispatcher {
    pub(crate) fn new(
        instance_id: InstanceId,
        connection: Arc<ConnectionManager>,
        store: Arc<dyn TaskStore>,
        publisher: Publisher,
        acks: AckHandler,
        supervisor: Option<ReconnectSupervisor>,
    ) -> Self {
        Self {
            instance_id,
            connection,
            store,
            publisher,
            acks,
            supervisor: Mutex::new(supervisor),
        }
    }

    /// Publish `body` as a message of `message_type` to this instance's
    /// queue, tracking it as a task.
    ///
    /// Returns the new message id once the broker accepted the message.
    /// On a publish error the task is left Failed and the error returned;
    /// a retry is a fresh call with a fresh id.
    pub async fn send_message<B: Serialize + ?Sized>(
        &self,
        message_type: &str,
        body: &B,
        needs_ack: bool,
    ) -> Result<MessageId, DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        self.publisher.send(message_type, body, needs_ack).await
    }

    /// Record that the consumer finished `message_id`, optionally with a
    /// result value.
    pub async fn ack_message<R: Serialize + ?Sized>(
        &self,
        message_id: &MessageId,
        result: Option<&R>,
    ) -> Result<(), DispatchError> {
        self.acks.ack(message_id, result).await
    }

    /// `ack_message` without a result.
    pub async fn acknowledge(&self, message_id: &MessageId) -> Result<(), DispatchError> {
        self.acks.ack(message_id, None::<&()>).await
    }

    pub fn queue_name(&self) -> &str {
        self.connection.topology().queue_name()
    }

    pub fn sent_by(&self) -> &str {
        self.connection.topology().sent_by()
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// The task row for `message_id`.
    pub async fn task(&self, message_id: &MessageId) -> Result<Task, DispatchError> {
        match self.store.get_task_by_message_id(message_id).await {
            Ok(task) => Ok(task),
            Err(StoreError::NotFound(_)) => Err(DispatchError::NotFound(*message_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Tasks in `status`, oldest first, plus the total count.
    pub async fn tasks_by_status(
        &self,
        status: MessageStatus,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Task>, u64), DispatchError> {
        Ok(self.store.list_tasks_by_status(status, offset, limit).await?)
    }

    pub async fn counts(&self) -> Result<StatusCounts, DispatchError> {
        let mut counts = StatusCounts::default();
        for status in MessageStatus::ALL {
            let (_, total) = self.store.list_tasks_by_status(status, 0, 0).await?;
            counts.set(status, total);
        }
        Ok(counts)
    }

    pub async fn status(&self) -> Result<DispatcherStatus, DispatchError> {
        Ok(DispatcherStatus {
            queue_name: self.queue_name().to_string(),
            sent_by: self.sent_by().to_string(),
            connection: self.connection_state(),
            counts: self.counts().await?,
        })
    }

    /// Stop the reconnect supervisor, then close the channel and
    /// connection. Later sends fail with `Closed`. Idempotent.
    pub async fn close(&self) -> Result<(), DispatchError> {
        if let Some(supervisor) = self.supervisor.lock().await.take() {
            supervisor.shutdown_and_join().await;
        }
        let result = self.connection.close().await;
        match &result {
            Ok(()) => info!(queue = %self.queue_name(), "dispatcher closed"),
            Err(e) => warn!(queue = %self.queue_name(), error = %e, "dispatcher closed with error"),
        }
        result
    }

    fn is_closed(&self) -> bool {
        matches!(
            self.connection.state(),
            ConnectionState::Closing | ConnectionState::Closed
        )
    }
}
