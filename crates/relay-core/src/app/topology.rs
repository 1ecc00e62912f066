//! QueueTopology - per-instance queue naming and routing.
//!
//! Every instance owns one durable queue bound to the shared direct exchange
//! with its own name as routing key, so a publish with that key reaches this
//! instance only (unicast over a shared exchange).

use std::fmt;

use crate::domain::InstanceId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    exchange: String,
    queue_name: String,
    sent_by: String,
}

impl QueueTopology {
    /// `queue_name = "<prefix>-<hostname>-<instance_id>"`.
    pub fn for_instance(
        prefix: &str,
        exchange: impl Into<String>,
        hostname: &str,
        instance_id: InstanceId,
    ) -> Self {
        let host = sanitize(hostname);
        let sent_by = format!("{host}-{instance_id}");
        Self {
            exchange: exchange.into(),
            queue_name: format!("{prefix}-{sent_by}"),
            sent_by,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Binding key and publish key are the queue name.
    pub fn routing_key(&self) -> &str {
        &self.queue_name
    }

    /// Sender identity stamped on envelopes and tasks.
    pub fn sent_by(&self) -> &str {
        &self.sent_by
    }
}

impl fmt::Display for QueueTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} (key={})", self.exchange, self.queue_name, self.routing_key())
    }
}

/// Name of the machine, or `"unknown"` if it cannot be read.
pub fn local_hostname() -> String {
    let name = gethostname::gethostname().to_string_lossy().into_owned();
    if name.trim().is_empty() {
        "unknown".to_string()
    } else {
        name
    }
}

// Keep names valid as AMQP queue names and routing keys.
fn sanitize(hostname: &str) -> String {
    let cleaned: String = hostname
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
