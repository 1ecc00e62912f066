//! Domain - ドメインモデル
//!
//! ids, envelope, task レコード, ステータス, エラー

pub mod ids;
pub mod envelope;
pub mod task;
pub mod state;
pub mod errors;

pub use self::ids::{InstanceId, MessageId, ParseIdError, TaskRecordId};
pub use self::envelope::MessageEnvelope;
pub use self::task::Task;
pub use self::state::MessageStatus;
pub use self::errors::{DispatchError, ErrorKind};
