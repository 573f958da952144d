use std::fmt;

/// Controls how many events an [`EventStream`](crate::EventStream) buffers
/// between its background reader and the consumer.
///
/// The reader pulls from the RPC channel continuously so a slow test never
/// stalls the network side. What happens when the consumer falls behind
/// depends on the policy:
///
/// | Policy | When the buffer is full |
/// |--------|-------------------------|
/// | [`Bounded`](Self::Bounded) | The reader stops pulling from the RPC channel until the consumer makes room |
/// | [`Unbounded`](Self::Unbounded) | Never full; memory grows with the backlog |
///
/// Neither policy drops events.
///
/// # Default
///
/// `Bounded(1024)`. Certification streams are short-lived and a test that
/// leaves more than a thousand events unread is almost certainly not
/// draining the stream it thinks it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BufferPolicy {
    /// Hold at most this many events; backpressure the reader beyond that.
    Bounded(usize),

    /// Hold every event the RPC channel produces.
    Unbounded,
}

impl BufferPolicy {
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Returns `true` if this is the [`Bounded`](Self::Bounded) policy.
    pub fn is_bounded(&self) -> bool {
        matches!(self, BufferPolicy::Bounded(_))
    }

    /// Buffer capacity, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            // mpsc channels reject a zero capacity
            BufferPolicy::Bounded(n) => Some((*n).max(1)),
            BufferPolicy::Unbounded => None,
        }
    }
}

impl Default for BufferPolicy {
    fn default() -> Self {
        BufferPolicy::Bounded(Self::DEFAULT_CAPACITY)
    }
}

impl fmt::Display for BufferPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferPolicy::Bounded(n) => write!(f, "Bounded({n})"),
            BufferPolicy::Unbounded => write!(f, "Unbounded"),
        }
    }
}
