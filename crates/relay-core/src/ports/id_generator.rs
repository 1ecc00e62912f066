//! IdGenerator port - ID minting behind a trait.
//!
//! # Implementations
//! - **UlidGenerator**: ULID from a `Clock` timestamp plus 80 random bits.

use crate::domain::ids::{InstanceId, MessageId};
use crate::ports::Clock;
use ulid::Ulid;

/// Mints identifiers that are unique without coordination between nodes.
pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;

    fn generate_instance_id(&self) -> InstanceId;
}

/// ULID generator reading time from a `Clock`, so tests can pin the
/// timestamp part while the random part still keeps IDs distinct.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_message_id(&self) -> MessageId {
        MessageId::from(self.next_ulid())
    }

    fn generate_instance_id(&self) -> InstanceId {
        InstanceId::from(self.next_ulid())
    }
}
