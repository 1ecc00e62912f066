//! relay-core
//!
//! Message dispatch and task tracking over an AMQP broker.
//!
//! # Modules
//! - **domain**: ids, envelope, task record, status machine, errors
//! - **ports**: TaskStore, BrokerConnector/BrokerChannel, Clock, IdGenerator
//! - **app**: Dispatcher and its parts (publisher, ack, connection, supervisor)
//! - **impls**: lapin adapter plus in-memory broker and store
//! - **config**: TOML + environment configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{BuildError, Dispatcher, DispatcherBuilder};
pub use config::RelayConfig;
pub use domain::{DispatchError, MessageEnvelope, MessageId, MessageStatus, Task};
