//! Status - ステータスクエリ
//!
//! Dispatcher ごとの task 件数と接続状態のスナップショット。

use serde::Serialize;

use super::connection::ConnectionState;
use crate::domain::MessageStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub delivered: u64,
    pub failed: u64,
    pub acknowledged: u64,
}

impl StatusCounts {
    pub fn set(&mut self, status: MessageStatus, count: u64) {
        match status {
            MessageStatus::Pending => self.pending = count,
            MessageStatus::Delivered => self.delivered = count,
            MessageStatus::Failed => self.failed = count,
            MessageStatus::Acknowledged => self.acknowledged = count,
        }
    }

    pub fn get(&self, status: MessageStatus) -> u64 {
        match status {
            MessageStatus::Pending => self.pending,
            MessageStatus::Delivered => self.delivered,
            MessageStatus::Failed => self.failed,
            MessageStatus::Acknowledged => self.acknowledged,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.delivered + self.failed + self.acknowledged
    }
}

/// What `Dispatcher::status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatus {
    pub queue_name: String,
    pub sent_by: String,
    pub connection: ConnectionState,
    pub counts: StatusCounts,
}
