use std::{future::Future, time::Duration};

use crate::{Event, Result, config::DEFAULT_TIMEOUT};

/// Anything an assertion can drain events from.
///
/// Implemented by [`EventStream`](crate::EventStream) and by
/// [`AclConnection`](crate::acl::AclConnection), which reads the
/// device-wide ACL data stream.
///
/// Methods return futures but can be implemented as `async fn` directly.
pub trait EventSource {
    type Event: Event;

    /// Wait at most `timeout` for the next event and remove it.
    ///
    /// Fails with [`Error::Timeout`](crate::Error::Timeout),
    /// [`Error::Cancelled`](crate::Error::Cancelled) or
    /// [`Error::Exhausted`](crate::Error::Exhausted).
    fn next(&self, timeout: Duration) -> impl Future<Output = Result<Self::Event>> + Send;

    /// Release the resources behind this source. Calling it twice is a no-op.
    fn close(&self);

    /// Bounded wait used by assertions that do not call
    /// [`within`](crate::Emits::within).
    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }
}
