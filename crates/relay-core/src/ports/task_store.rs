//! TaskStore port - durable source of truth for task records.
//!
//! The dispatcher only needs create / update / lookup-by-message-id. The SQL
//! implementation lives outside this crate; `impls::InMemoryTaskStore` is the
//! reference implementation used by tests and the CLI.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{MessageId, MessageStatus, Task};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task not found: message_id={0}")]
    NotFound(MessageId),

    #[error("task already exists: message_id={0}")]
    Duplicate(MessageId),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Durable CRUD for task rows.
///
/// # Contract
/// - `create_task` assigns `task.id` when it is `None` and rejects a
///   second row with the same `message_id`.
/// - `update_task` replaces the row keyed by `message_id`; updating an
///   unknown message is `NotFound`.
/// - Dropping a returned future cancels the operation where the backend
///   supports it.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &mut Task) -> Result<(), StoreError>;

    async fn update_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn get_task_by_message_id(&self, message_id: &MessageId) -> Result<Task, StoreError>;

    /// One page of tasks in `status`, oldest first, plus the total count.
    async fn list_tasks_by_status(
        &self,
        status: MessageStatus,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Task>, u64), StoreError>;
}
