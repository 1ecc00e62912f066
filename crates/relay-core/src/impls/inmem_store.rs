//! InMemoryTaskStore - reference `TaskStore` for tests and the CLI.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::domain::{MessageId, MessageStatus, Task, TaskRecordId};
use crate::ports::{StoreError, TaskStore};

#[derive(Default)]
struct Faults {
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
    fail_reads: AtomicBool,
}

#[derive(Default)]
struct Calls {
    creates: AtomicUsize,
    updates: AtomicUsize,
}

/// Task rows keyed by message id. Clones share the same rows.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<Mutex<HashMap<MessageId, Task>>>,
    faults: Arc<Faults>,
    calls: Arc<Calls>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.faults.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.faults.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Calls to `create_task`, including failed ones.
    pub fn create_calls(&self) -> usize {
        self.calls.creates.load(Ordering::SeqCst)
    }

    /// Calls to `update_task`, including failed ones.
    pub fn update_calls(&self) -> usize {
        self.calls.updates.load(Ordering::SeqCst)
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    pub async fn all(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.lock().await.values().cloned().collect();
        tasks.sort_by_key(|t| (t.created_at, t.message_id));
        tasks
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: &mut Task) -> Result<(), StoreError> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_creates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("insert failed".to_string()));
        }

        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.message_id) {
            return Err(StoreError::Duplicate(task.message_id));
        }
        if task.id.is_none() {
            task.id = Some(TaskRecordId::from_ulid(Ulid::new()));
        }
        tasks.insert(task.message_id, task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        self.calls.updates.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("update failed".to_string()));
        }

        let mut tasks = self.tasks.lock().await;
        let Some(row) = tasks.get_mut(&task.message_id) else {
            return Err(StoreError::NotFound(task.message_id));
        };
        let id = row.id;
        *row = task.clone();
        // The surrogate key belongs to the store.
        row.id = id;
        Ok(())
    }

    async fn get_task_by_message_id(&self, message_id: &MessageId) -> Result<Task, StoreError> {
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("select failed".to_string()));
        }
        self.tasks
            .lock()
            .await
            .get(message_id)
            .cloned()
            .ok_or(StoreError::NotFound(*message_id))
    }

    async fn list_tasks_by_status(
        &self,
        status: MessageStatus,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Task>, u64), StoreError> {
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("select failed".to_string()));
        }
        let mut matching: Vec<Task> = self
            .tasks
            .lock()
            .await
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|t| (t.created_at, t.message_id));
        let total = matching.len() as u64;
        let page = matching.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageEnvelope;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn task(offset_secs: i64) -> Task {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs);
        let envelope = MessageEnvelope::with_body(
            MessageId::from_ulid(Ulid::new()),
            "t",
            now,
            "node",
            &json!({}),
            false,
        )
        .unwrap();
        Task::pending(&envelope, "{}".to_string(), "q", now)
    }

    #[tokio::test]
    async fn create_assigns_record_id() {
        let store = InMemoryTaskStore::new();
        let mut t = task(0);
        store.create_task(&mut t).await.unwrap();

        assert!(t.id.is_some());
        let stored = store.get_task_by_message_id(&t.message_id).await.unwrap();
        assert_eq!(stored, t);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_rejected() {
        let store = InMemoryTaskStore::new();
        let mut t = task(0);
        store.create_task(&mut t).await.unwrap();

        let mut again = t.clone();
        let err = store.create_task(&mut again).await.unwrap_err();
        assert_eq!(err, StoreError::Duplicate(t.message_id));
    }

    #[tokio::test]
    async fn update_replaces_row_but_keeps_record_id() {
        let store = InMemoryTaskStore::new();
        let mut t = task(0);
        store.create_task(&mut t).await.unwrap();

        let mut changed = t.clone();
        changed.id = None;
        changed.mark_delivered(t.created_at).unwrap();
        store.update_task(&changed).await.unwrap();

        let stored = store.get_task_by_message_id(&t.message_id).await.unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);
        assert_eq!(stored.id, t.id);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = InMemoryTaskStore::new();
        let t = task(0);
        assert_eq!(
            store.get_task_by_message_id(&t.message_id).await.unwrap_err(),
            StoreError::NotFound(t.message_id)
        );
        assert_eq!(
            store.update_task(&t).await.unwrap_err(),
            StoreError::NotFound(t.message_id)
        );
    }

    #[tokio::test]
    async fn list_by_status_pages_oldest_first() {
        let store = InMemoryTaskStore::new();
        let mut created = Vec::new();
        for i in 0..5 {
            let mut t = task(i);
            store.create_task(&mut t).await.unwrap();
            created.push(t);
        }
        let mut delivered = created[4].clone();
        delivered.mark_delivered(delivered.created_at).unwrap();
        store.update_task(&delivered).await.unwrap();

        let (page, total) = store
            .list_tasks_by_status(MessageStatus::Pending, 1, 2)
            .await
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].message_id, created[1].message_id);
        assert_eq!(page[1].message_id, created[2].message_id);

        let (_, delivered_total) = store
            .list_tasks_by_status(MessageStatus::Delivered, 0, 0)
            .await
            .unwrap();
        assert_eq!(delivered_total, 1);
    }

    #[tokio::test]
    async fn injected_faults_surface_as_backend_errors() {
        let store = InMemoryTaskStore::new();
        store.set_fail_creates(true);
        let mut t = task(0);
        assert!(matches!(
            store.create_task(&mut t).await,
            Err(StoreError::Backend(_))
        ));
        assert!(store.is_empty().await);
        assert_eq!(store.create_calls(), 1);
    }
}
