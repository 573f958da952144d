use std::fmt;

use uuid::Uuid;

/// Unique identifier of an opened [`EventStream`](crate::EventStream).
///
/// Several streams may share a name (every `CreateConnection` call opens
/// its own setup stream), so log lines carry this id as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(Uuid);

impl StreamId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn value(&self) -> u128 {
        self.0.as_u128()
    }
}

impl From<u128> for StreamId {
    fn from(raw: u128) -> Self {
        Self(Uuid::from_u128(raw))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}
