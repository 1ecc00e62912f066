//! DispatcherBuilder - Dispatcher の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターン（依存を setter で注入）
//! - 起動時検証（Fail-fast 設計）
//!
//! # Fail-fast
//! `build()` は動かない Dispatcher を返さない。不正な config と task store
//! 未設定はエラー。`lazy_connect()` を指定しない限り broker に繋がらない
//! こともエラー。

use std::sync::Arc;

use tracing::info;

use super::ack::AckHandler;
use super::connection::ConnectionManager;
use super::dispatcher::Dispatcher;
use super::publisher::Publisher;
use super::supervisor::ReconnectSupervisor;
use super::topology::{QueueTopology, local_hostname};
use crate::config::{ConfigError, RelayConfig};
use crate::domain::DispatchError;
use crate::impls::AmqpConnector;
use crate::ports::{BrokerConnector, Clock, IdGenerator, SystemClock, TaskStore, UlidGenerator};

/// Builds a `Dispatcher`.
///
/// # Example
/// ```ignore
/// let dispatcher = DispatcherBuilder::new(RelayConfig::load("relay.toml")?)
///     .task_store(Arc::new(store))
///     .build()
///     .await?;
/// ```
pub struct DispatcherBuilder {
    config: RelayConfig,
    store: Option<Arc<dyn TaskStore>>,
    connector: Option<Arc<dyn BrokerConnector>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    connect_on_build: bool,
    supervise: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no task store configured. Call `task_store()` before `build()`.")]
    MissingTaskStore,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("initial broker connection failed: {0}")]
    Connect(#[source] DispatchError),
}

impl DispatcherBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            store: None,
            connector: None,
            clock: Arc::new(SystemClock),
            ids: None,
            connect_on_build: true,
            supervise: true,
        }
    }

    pub fn task_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to an `AmqpConnector` for `config.broker`.
    pub fn connector(mut self, connector: Arc<dyn BrokerConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to a `UlidGenerator` on the configured clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Skip the initial dial; the first send (or the supervisor) connects.
    pub fn lazy_connect(mut self) -> Self {
        self.connect_on_build = false;
        self
    }

    /// Run without a background reconnect task. Sends still reconnect
    /// inline once the backoff window has passed.
    pub fn without_supervisor(mut self) -> Self {
        self.supervise = false;
        self
    }

    pub async fn build(self) -> Result<Dispatcher, BuildError> {
        let config = self.config;
        config.validate()?;
        let store = self.store.ok_or(BuildError::MissingTaskStore)?;

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(AmqpConnector::new(&config.broker)));
        let clock = self.clock;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let instance_id = ids.generate_instance_id();
        let hostname = config
            .dispatch
            .node_name
            .clone()
            .unwrap_or_else(local_hostname);
        let topology = QueueTopology::for_instance(
            &config.dispatch.queue_prefix,
            config.dispatch.exchange.clone(),
            &hostname,
            instance_id,
        );

        let connection = Arc::new(ConnectionManager::new(
            connector,
            topology,
            config.reconnect.policy(),
            config.dispatch.connect_timeout(),
        ));
        if self.connect_on_build {
            connection.connect().await.map_err(BuildError::Connect)?;
        }

        let supervisor = self.supervise.then(|| {
            ReconnectSupervisor::spawn(
                Arc::clone(&connection),
                config.reconnect.health_check_interval(),
            )
        });

        info!(
            instance_id = %instance_id,
            topology = %connection.topology(),
            "dispatcher ready"
        );

        let publisher = Publisher::new(
            Arc::clone(&connection),
            Arc::clone(&store),
            Arc::clone(&clock),
            ids,
            config.dispatch.publish_timeout(),
        );
        let acks = AckHandler::new(Arc::clone(&store), clock);

        Ok(Dispatcher::new(
            instance_id,
            connection,
            store,
            publisher,
            acks,
            supervisor,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::connection::ConnectionState;
    use crate::impls::{InMemoryBroker, InMemoryTaskStore};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn config() -> RelayConfig {
        let mut config = RelayConfig::default();
        config.dispatch.node_name = Some("builder-test".to_string());
        config
    }

    #[tokio::test]
    async fn test_build_success_connects_and_declares() {
        let broker = InMemoryBroker::new();
        let dispatcher = DispatcherBuilder::new(config())
            .task_store(Arc::new(InMemoryTaskStore::new()))
            .connector(Arc::new(broker.clone()))
            .build()
            .await
            .unwrap();

        assert_eq!(dispatcher.connection_state(), ConnectionState::Connected);
        assert!(broker.has_queue(dispatcher.queue_name()));
        assert!(dispatcher.sent_by().starts_with("builder-test-inst-"));
        dispatcher.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_build_missing_task_store() {
        let result = DispatcherBuilder::new(config())
            .connector(Arc::new(InMemoryBroker::new()))
            .build()
            .await;
        assert!(matches!(result, Err(BuildError::MissingTaskStore)));
    }

    #[tokio::test]
    async fn test_build_invalid_config() {
        let mut config = config();
        config.dispatch.exchange = String::new();
        let result = DispatcherBuilder::new(config)
            .task_store(Arc::new(InMemoryTaskStore::new()))
            .connector(Arc::new(InMemoryBroker::new()))
            .build()
            .await;
        assert!(matches!(result, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }

    #[tokio::test]
    async fn test_build_unreachable_broker() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        let result = DispatcherBuilder::new(config())
            .task_store(Arc::new(InMemoryTaskStore::new()))
            .connector(Arc::new(broker))
            .build()
            .await;
        assert!(matches!(
            result,
            Err(BuildError::Connect(DispatchError::Connection(_)))
        ));
    }

    #[tokio::test]
    async fn test_injected_clock_and_ids_reach_the_task() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now));
        let store = InMemoryTaskStore::new();
        let dispatcher = DispatcherBuilder::new(config())
            .task_store(Arc::new(store.clone()))
            .connector(Arc::new(InMemoryBroker::new()))
            .clock(Arc::clone(&clock))
            .id_generator(Arc::new(UlidGenerator::new(clock)))
            .without_supervisor()
            .build()
            .await
            .unwrap();

        let id = dispatcher.send_message("timed", &json!({}), false).await.unwrap();

        let task = dispatcher.task(&id).await.unwrap();
        assert_eq!(task.created_at, now);
        assert_eq!(task.updated_at, now);
        assert_eq!(id.as_ulid().timestamp_ms(), now.timestamp_millis() as u64);
        assert_eq!(
            dispatcher.instance_id().as_ulid().timestamp_ms(),
            now.timestamp_millis() as u64
        );
        assert!(dispatcher.sent_by().ends_with(&dispatcher.instance_id().to_string()));
    }

    #[tokio::test]
    async fn test_lazy_connect_dials_on_first_send() {
        let broker = InMemoryBroker::new();
        let dispatcher = DispatcherBuilder::new(config())
            .task_store(Arc::new(InMemoryTaskStore::new()))
            .connector(Arc::new(broker.clone()))
            .lazy_connect()
            .without_supervisor()
            .build()
            .await
            .unwrap();

        assert_eq!(dispatcher.connection_state(), ConnectionState::Disconnected);
        assert_eq!(broker.connect_attempts(), 0);

        dispatcher.send_message("first", &json!({}), false).await.unwrap();
        assert_eq!(broker.connect_count(), 1);
        assert_eq!(dispatcher.connection_state(), ConnectionState::Connected);
    }
}
