//! AMQP 0-9-1 adapter on lapin.

use async_trait::async_trait;
use lapin::options::{
    BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::debug;

use crate::app::topology::QueueTopology;
use crate::config::BrokerConfig;
use crate::ports::{BrokerChannel, BrokerConnector, BrokerError, PublishProperties};

const PERSISTENT: u8 = 2;
const TRANSIENT: u8 = 1;

/// Dials a RabbitMQ-compatible broker.
pub struct AmqpConnector {
    uri: String,
    redacted_uri: String,
}

impl AmqpConnector {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            uri: config.uri(),
            redacted_uri: config.redacted_uri(),
        }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self, topology: &QueueTopology) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        debug!(uri = %self.redacted_uri, "dialing broker");
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let channel = match open_channel(&connection, topology).await {
            Ok(channel) => channel,
            Err(e) => {
                // Partial topology is never handed out.
                if let Err(close_err) = connection.close(200, "topology setup failed").await {
                    debug!(error = %close_err, "closing half-open connection failed");
                }
                return Err(e);
            }
        };

        Ok(Box::new(AmqpChannel {
            connection,
            channel,
        }))
    }
}

async fn open_channel(connection: &Connection, topology: &QueueTopology) -> Result<Channel, BrokerError> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| BrokerError::Channel(e.to_string()))?;

    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| BrokerError::Channel(e.to_string()))?;

    channel
        .exchange_declare(
            topology.exchange(),
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                auto_delete: false,
                internal: false,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Declare {
            entity: "exchange",
            reason: e.to_string(),
        })?;

    channel
        .queue_declare(
            topology.queue_name(),
            QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Declare {
            entity: "queue",
            reason: e.to_string(),
        })?;

    channel
        .queue_bind(
            topology.queue_name(),
            topology.exchange(),
            topology.routing_key(),
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Bind(e.to_string()))?;

    Ok(channel)
}

fn basic_properties(properties: &PublishProperties) -> BasicProperties {
    BasicProperties::default()
        .with_content_type(properties.content_type.into())
        .with_delivery_mode(if properties.persistent { PERSISTENT } else { TRANSIENT })
        .with_message_id(properties.message_id.clone().into())
        .with_timestamp(properties.timestamp.timestamp().max(0) as u64)
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: PublishProperties,
    ) -> Result<(), BrokerError> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                basic_properties(&properties),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        let confirmation = confirm
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        if confirmation.is_nack() {
            return Err(BrokerError::Publish("broker nacked the message".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let channel_closed = if self.channel.status().connected() {
            self.channel.close(200, "closing").await.map_err(|e| e.to_string())
        } else {
            Ok(())
        };
        // The connection is released even when the channel close failed.
        let connection_closed = if self.connection.status().connected() {
            self.connection
                .close(200, "closing")
                .await
                .map_err(|e| e.to_string())
        } else {
            Ok(())
        };
        first_close_error(channel_closed, connection_closed)
    }
}

fn first_close_error(
    channel: Result<(), String>,
    connection: Result<(), String>,
) -> Result<(), BrokerError> {
    if let Err(e) = &connection {
        if channel.is_err() {
            debug!(error = %e, "connection close also failed");
        }
    }
    channel.and(connection).map_err(BrokerError::Close)
}
