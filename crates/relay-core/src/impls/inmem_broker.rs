//! InMemoryBroker - a broker double for development and tests.
//!
//! Models just enough of AMQP for the dispatcher: idempotent declares,
//! direct-exchange routing by exact key, and connections that can be cut.
//! Faults are injected through setters (unreachable, failing publishes,
//! slow publishes). Each channel also detects overlapping publishes, which
//! would be a protocol error on a real AMQP channel.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::app::topology::QueueTopology;
use crate::ports::{BrokerChannel, BrokerConnector, BrokerError, PublishProperties};

/// A message as the broker stored it.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: PublishProperties,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, VecDeque<PublishedMessage>>,
    /// (exchange, routing_key) -> bound queues
    bindings: HashMap<(String, String), HashSet<String>>,
    unroutable: Vec<PublishedMessage>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BrokerState>,
    unreachable: AtomicBool,
    fail_publishes: AtomicBool,
    publish_delay_ms: AtomicU64,
    generation: AtomicU64,
    connect_attempts: AtomicUsize,
    connect_count: AtomicUsize,
    open_channels: AtomicUsize,
    concurrent_use: AtomicUsize,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheap to clone; clones share one broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// An unreachable broker refuses dials and kills open channels.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn set_fail_publishes(&self, fail: bool) {
        self.shared.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn set_publish_delay(&self, delay: Duration) {
        self.shared
            .publish_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Server-side close of every open connection.
    pub fn drop_connections(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Successful dials.
    pub fn connect_count(&self) -> usize {
        self.shared.connect_count.load(Ordering::SeqCst)
    }

    pub fn open_channels(&self) -> usize {
        self.shared.open_channels.load(Ordering::SeqCst)
    }

    /// Publishes that overlapped on one channel.
    pub fn concurrent_use_violations(&self) -> usize {
        self.shared.concurrent_use.load(Ordering::SeqCst)
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.shared.state().queues.contains_key(queue)
    }

    pub fn queue_count(&self) -> usize {
        self.shared.state().queues.len()
    }

    pub fn is_bound(&self, exchange: &str, queue: &str, routing_key: &str) -> bool {
        self.shared
            .state()
            .bindings
            .get(&(exchange.to_string(), routing_key.to_string()))
            .is_some_and(|queues| queues.contains(queue))
    }

    pub fn messages_in(&self, queue: &str) -> Vec<PublishedMessage> {
        self.shared
            .state()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn unroutable(&self) -> Vec<PublishedMessage> {
        self.shared.state().unroutable.clone()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self, topology: &QueueTopology) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let shared = &self.shared;
        shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if shared.unreachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Connect("connection refused".to_string()));
        }

        {
            let mut state = shared.state();
            state.exchanges.insert(topology.exchange().to_string());
            state
                .queues
                .entry(topology.queue_name().to_string())
                .or_default();
            state
                .bindings
                .entry((
                    topology.exchange().to_string(),
                    topology.routing_key().to_string(),
                ))
                .or_default()
                .insert(topology.queue_name().to_string());
        }

        shared.connect_count.fetch_add(1, Ordering::SeqCst);
        shared.open_channels.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryChannel {
            shared: Arc::clone(shared),
            generation: shared.generation.load(Ordering::SeqCst),
            open: AtomicBool::new(true),
            in_flight: AtomicBool::new(false),
        }))
    }
}

struct InMemoryChannel {
    shared: Arc<Shared>,
    generation: u64,
    open: AtomicBool,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag even when the publish future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
            && !self.shared.unreachable.load(Ordering::SeqCst)
            && self.generation == self.shared.generation.load(Ordering::SeqCst)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: PublishProperties,
    ) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Publish("channel/connection is not open".to_string()));
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.shared.concurrent_use.fetch_add(1, Ordering::SeqCst);
            return Err(BrokerError::Publish("channel used concurrently".to_string()));
        }
        let _in_flight = InFlight(&self.in_flight);

        let delay = self.shared.publish_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.shared.fail_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("broker rejected message".to_string()));
        }

        let message = PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.to_vec(),
            properties,
        };
        let mut state = self.shared.state();
        if !state.exchanges.contains(exchange) {
            return Err(BrokerError::Publish(format!("no exchange '{exchange}'")));
        }
        let targets: Vec<String> = state
            .bindings
            .get(&(exchange.to_string(), routing_key.to_string()))
            .map(|queues| queues.iter().cloned().collect())
            .unwrap_or_default();
        if targets.is_empty() {
            state.unroutable.push(message);
            return Ok(());
        }
        for queue in targets {
            state.queues.entry(queue).or_default().push_back(message.clone());
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.shared.open_channels.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
