use std::time::Duration;

use crate::BufferPolicy;

/// Default bounded wait for every drain.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Harness configuration shared by the manager, its connections and the
/// streams they open.
///
/// # Examples
///
/// ```rust
/// use acl_cert::{BufferPolicy, Config};
/// use std::time::Duration;
///
/// let config = Config::default()
///     .with_default_timeout(Duration::from_secs(10))   // slow controller
///     .with_stream_buffer(BufferPolicy::Unbounded);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    default_timeout: Duration,
    stream_buffer: BufferPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_timeout: DEFAULT_TIMEOUT,
            stream_buffer: BufferPolicy::default(),
        }
    }
}

impl Config {
    /// Set the bounded wait used by connection setup and acceptance.
    ///
    /// Individual assertions can still override it with
    /// [`Emits::within`](crate::Emits::within).
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Returns the default drain timeout.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Set the buffer policy for every stream opened through the manager.
    pub fn with_stream_buffer(mut self, policy: BufferPolicy) -> Self {
        self.stream_buffer = policy;
        self
    }

    /// Returns the stream buffer policy.
    pub fn stream_buffer(&self) -> BufferPolicy {
        self.stream_buffer
    }
}
