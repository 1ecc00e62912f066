//! Domain identifiers (strongly-typed IDs).
//!
//! Every identifier is a ULID wrapped in `Id<T>`, where `T` is a zero-sized
//! marker that only exists at compile time. The marker supplies the display
//! prefix, so a `MessageId` renders as `msg-01J...` and can never be passed
//! where an `InstanceId` is expected.
//!
//! ULIDs sort by creation time and can be minted on any node without
//! coordination, which is what keeps message ids unique across instances.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait supplying the textual prefix of an ID type.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when a string is not a valid `<prefix><ulid>` identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected_prefix}id: {input}")]
pub struct ParseIdError {
    expected_prefix: &'static str,
    input: String,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            expected_prefix: T::prefix(),
            input: s.to_string(),
        };
        let raw = s.strip_prefix(T::prefix()).ok_or_else(err)?;
        let ulid = Ulid::from_string(raw).map_err(|_| err())?;
        Ok(Self::from_ulid(ulid))
    }
}

// On the wire an id is always its display string.
impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ========================================
// Markers
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {}

impl IdMarker for Message {
    fn prefix() -> &'static str {
        "msg-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Instance {}

impl IdMarker for Instance {
    fn prefix() -> &'static str {
        "inst-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskRecord {}

impl IdMarker for TaskRecord {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Identity of one published message (one send attempt).
pub type MessageId = Id<Message>;

/// Identity of one running dispatcher instance.
pub type InstanceId = Id<Instance>;

/// Store-side surrogate key of a task row.
pub type TaskRecordId = Id<TaskRecord>;
