//! Test helpers shared across modules.

use serde::{Serialize, Serializer};

/// A value whose `Serialize` impl always fails.
pub struct Unencodable;

impl Serialize for Unencodable {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("value cannot be encoded"))
    }
}
