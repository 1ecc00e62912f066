//! ConnectionManager - one broker connection + channel per instance.
//!
//! All access to the channel (connect, publish, close) goes through one
//! `tokio::sync::Mutex`, because the channel is not safe for concurrent use.
//! Two sends on the same instance therefore never interleave on the wire.
//!
//! # States
//! ```text
//! Disconnected -> Connecting -> Connected
//!      ^              |             |
//!      +--------------+-------------+   (dial failed / channel died)
//! any -> Closing -> Closed
//! ```
//!
//! After a failed dial the manager refuses to dial again until the backoff
//! window from `ReconnectPolicy` has passed. Publishes inside that window
//! fail fast instead of each paying a full connect timeout; the
//! `ReconnectSupervisor` retries in the background.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::ReconnectPolicy;
use super::topology::QueueTopology;
use crate::domain::DispatchError;
use crate::ports::{BrokerChannel, BrokerConnector, PublishProperties};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Result of one supervisor health pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealOutcome {
    Healthy,
    Reconnected,
    Failed { retry_in: Duration },
    Closed,
}

struct Inner {
    channel: Option<Box<dyn BrokerChannel>>,
    /// Consecutive failed dials.
    failures: u32,
    /// No dial before this instant.
    retry_after: Option<Instant>,
    last_error: Option<String>,
}

pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    topology: QueueTopology,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_requested: Notify,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        topology: QueueTopology,
        policy: ReconnectPolicy,
        connect_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            topology,
            policy,
            connect_timeout,
            inner: Mutex::new(Inner {
                channel: None,
                failures: 0,
                retry_after: None,
                last_error: None,
            }),
            state_tx,
            reconnect_requested: Notify::new(),
        }
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state changes (used by the supervisor and by tests).
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Resolves once someone asked for a background reconnect.
    pub async fn reconnect_requested(&self) {
        self.reconnect_requested.notified().await;
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn request_reconnect(&self) {
        self.reconnect_requested.notify_one();
    }

    /// Close and forget the current channel. A channel that reports dead
    /// may still hold its connection open.
    async fn discard_channel(&self, inner: &mut Inner) {
        if let Some(stale) = inner.channel.take() {
            if let Err(e) = stale.close().await {
                debug!(error = %e, "closing stale channel failed");
            }
        }
    }

    /// Dial, open a channel and declare the topology.
    ///
    /// An explicit call dials immediately, ignoring any backoff window, and
    /// reopens a manager that was closed.
    pub async fn connect(&self) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock().await;
        self.connect_locked(&mut inner).await
    }

    async fn connect_locked(&self, inner: &mut Inner) -> Result<(), DispatchError> {
        self.set_state(ConnectionState::Connecting);

        self.discard_channel(inner).await;

        let attempt = tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.topology)).await;
        let error = match attempt {
            Ok(Ok(channel)) => {
                inner.channel = Some(channel);
                inner.failures = 0;
                inner.retry_after = None;
                inner.last_error = None;
                self.set_state(ConnectionState::Connected);
                info!(
                    exchange = %self.topology.exchange(),
                    queue = %self.topology.queue_name(),
                    "connected to broker"
                );
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("connect timed out after {:?}", self.connect_timeout),
        };

        inner.failures = inner.failures.saturating_add(1);
        let delay = self.policy.next_delay(inner.failures);
        inner.retry_after = Some(Instant::now() + delay);
        inner.last_error = Some(error.clone());
        self.set_state(ConnectionState::Disconnected);
        warn!(
            queue = %self.topology.queue_name(),
            failures = inner.failures,
            retry_in = ?delay,
            error = %error,
            "broker connection failed"
        );
        Err(DispatchError::Connection(error))
    }

    /// Make sure `inner.channel` is live, dialing inline if allowed.
    async fn ensure_connected_locked(&self, inner: &mut Inner) -> Result<(), DispatchError> {
        match self.state() {
            ConnectionState::Closing | ConnectionState::Closed => return Err(DispatchError::Closed),
            _ => {}
        }

        match inner.channel.as_ref().map(|channel| channel.is_connected()) {
            Some(true) => return Ok(()),
            Some(false) => {
                warn!(queue = %self.topology.queue_name(), "broker channel is closed");
                self.discard_channel(inner).await;
                self.set_state(ConnectionState::Disconnected);
            }
            None => {}
        }

        if let Some(retry_after) = inner.retry_after {
            let now = Instant::now();
            if retry_after > now {
                self.request_reconnect();
                let last = inner.last_error.as_deref().unwrap_or("unknown error");
                return Err(DispatchError::Connection(format!(
                    "broker unavailable (retry in {:?}): {last}",
                    retry_after - now
                )));
            }
        }

        let result = self.connect_locked(inner).await;
        if result.is_err() {
            self.request_reconnect();
        }
        result
    }

    /// Publish `body` to this instance's own routing key.
    ///
    /// Connect failures come back as `Connection`, broker rejections as
    /// `Publish`, and an expired `timeout` as `PublishTimeout`.
    pub async fn publish(
        &self,
        body: &[u8],
        properties: PublishProperties,
        timeout: Duration,
    ) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock().await;
        self.ensure_connected_locked(&mut inner).await?;

        let Some(channel) = inner.channel.as_ref() else {
            return Err(DispatchError::Connection("no channel after connect".to_string()));
        };

        let sent = tokio::time::timeout(
            timeout,
            channel.publish(
                self.topology.exchange(),
                self.topology.routing_key(),
                body,
                properties,
            ),
        )
        .await;

        let err = match sent {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => DispatchError::Publish(e.to_string()),
            Err(_) => DispatchError::PublishTimeout(timeout),
        };

        let dead = !channel.is_connected();
        if dead {
            self.discard_channel(&mut inner).await;
            self.set_state(ConnectionState::Disconnected);
            self.request_reconnect();
        }
        Err(err)
    }

    /// One background health pass: reconnect if the channel is gone and
    /// the backoff window allows it.
    pub async fn heal(&self) -> HealOutcome {
        let mut inner = self.inner.lock().await;
        match self.state() {
            ConnectionState::Closing | ConnectionState::Closed => return HealOutcome::Closed,
            _ => {}
        }

        match inner.channel.as_ref().map(|channel| channel.is_connected()) {
            Some(true) => return HealOutcome::Healthy,
            Some(false) => {
                debug!(queue = %self.topology.queue_name(), "supervisor found a dead channel");
                self.discard_channel(&mut inner).await;
                self.set_state(ConnectionState::Disconnected);
            }
            None => {}
        }

        if let Some(retry_after) = inner.retry_after {
            let now = Instant::now();
            if retry_after > now {
                return HealOutcome::Failed {
                    retry_in: retry_after - now,
                };
            }
        }

        match self.connect_locked(&mut inner).await {
            Ok(()) => HealOutcome::Reconnected,
            Err(_) => HealOutcome::Failed {
                retry_in: self.policy.next_delay(inner.failures),
            },
        }
    }

    /// Close channel and connection. Safe to call repeatedly.
    pub async fn close(&self) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock().await;
        if self.state() == ConnectionState::Closed && inner.channel.is_none() {
            return Ok(());
        }

        self.set_state(ConnectionState::Closing);
        let result = match inner.channel.take() {
            Some(channel) => channel
                .close()
                .await
                .map_err(|e| DispatchError::Connection(e.to_string())),
            None => Ok(()),
        };
        inner.retry_after = None;
        self.set_state(ConnectionState::Closed);
        // Wake the supervisor so it notices the close.
        self.request_reconnect();

        info!(queue = %self.topology.queue_name(), "broker connection closed");
        result
    }
}
