//! Ports - 外部システムとの境界（trait）
//!
//! 各 trait が協調者を一つずつ隠します:
//! - TaskStore: task 行の永続化（本番は SQL）
//! - BrokerConnector / BrokerChannel: AMQP broker
//! - Clock / IdGenerator: 時刻と ID（テストで差し替え可能）

pub mod task_store;
pub mod broker;
pub mod clock;
pub mod id_generator;

pub use self::task_store::{StoreError, TaskStore};
pub use self::broker::{BrokerChannel, BrokerConnector, BrokerError, PublishProperties};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
