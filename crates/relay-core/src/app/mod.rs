//! App - アプリケーション層
//!
//! ports を組み合わせて送信・ack・接続管理を実装します。
//!
//! # 主要コンポーネント
//! - **DispatcherBuilder**: 構築とワイヤリング（起動時検証）
//! - **Dispatcher**: send / ack / 参照 / close の公開面
//! - **Publisher**: 永続化してから publish するパイプライン
//! - **AckHandler**: アプリケーションレベルの ack
//! - **ConnectionManager**: 直列化された唯一の broker channel
//! - **ReconnectSupervisor**: バックオフ付きのバックグラウンド再接続

pub mod ack;
pub mod backoff;
pub mod builder;
pub mod connection;
pub mod dispatcher;
pub mod publisher;
pub mod status;
pub mod supervisor;
pub mod topology;

pub use self::ack::AckHandler;
pub use self::backoff::ReconnectPolicy;
pub use self::builder::{BuildError, DispatcherBuilder};
pub use self::connection::{ConnectionManager, ConnectionState, HealOutcome};
pub use self::dispatcher::Dispatcher;
pub use self::publisher::Publisher;
pub use self::status::{DispatcherStatus, StatusCounts};
pub use self::supervisor::ReconnectSupervisor;
pub use self::topology::{QueueTopology, local_hostname};
