//! Broker port - one AMQP-style connection + channel.
//!
//! The connector dials and prepares topology; the channel it returns is the
//! only handle used for publishing. Channels are not safe for concurrent
//! use, so callers hold them behind a lock (see `app::connection`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::app::topology::QueueTopology;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("failed to open a channel: {0}")]
    Channel(String),

    #[error("failed to declare {entity}: {reason}")]
    Declare { entity: &'static str, reason: String },

    #[error("failed to bind queue: {0}")]
    Bind(String),

    #[error("failed to publish message: {0}")]
    Publish(String),

    #[error("failed to close: {0}")]
    Close(String),
}

/// Publish attributes carried alongside the body.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishProperties {
    pub content_type: &'static str,
    pub persistent: bool,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

impl PublishProperties {
    pub fn json(message_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            content_type: "application/json",
            persistent: true,
            message_id: message_id.into(),
            timestamp,
        }
    }
}

/// Dials the broker and makes `topology` exist.
///
/// # Contract
/// - Exchange: durable, type direct.
/// - Queue: durable, non-exclusive, not auto-deleted.
/// - Binding: queue bound with routing key = queue name.
/// - All declarations are idempotent; calling this again is safe.
/// - On any failure nothing is returned, so no half-prepared channel can
///   leak to callers.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, topology: &QueueTopology) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}

/// A live channel on a live connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Both the channel and its connection still report open.
    fn is_connected(&self) -> bool;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: PublishProperties,
    ) -> Result<(), BrokerError>;

    /// Close the channel, then the connection.
    async fn close(&self) -> Result<(), BrokerError>;
}
