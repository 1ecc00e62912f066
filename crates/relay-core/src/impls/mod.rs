//! Impls - adapters for the ports.
//!
//! - **AmqpConnector**: production broker adapter (lapin)
//! - **InMemoryBroker**: broker double with fault injection
//! - **InMemoryTaskStore**: reference TaskStore
//!
//! The SQL task store lives outside this crate.

pub mod amqp;
pub mod inmem_broker;
pub mod inmem_store;

pub use self::amqp::AmqpConnector;
pub use self::inmem_broker::{InMemoryBroker, PublishedMessage};
pub use self::inmem_store::InMemoryTaskStore;
