use std::{
    borrow::Cow,
    fmt,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures_util::{Stream, StreamExt, stream::BoxStream};
use tokio::{select, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use super::{
    EventSource,
    inbox::{self, Feed, Inbox},
};
use crate::{BufferPolicy, Error, Event, Result, StreamId, config::DEFAULT_TIMEOUT};

/// A server-streaming RPC response, as handed over by the facade.
pub type RpcStream<E> = BoxStream<'static, Result<E>>;

/// Pull-based wrapper around one RPC streaming channel.
///
/// Opening a stream spawns a reader task that moves events from the RPC
/// channel into a buffer (see [`BufferPolicy`]). The consumer drains the
/// buffer with [`next`](Self::next) or [`next_if`](Self::next_if);
/// consuming is destructive.
///
/// # Single reader
///
/// Only one drain may be in flight at a time. A second concurrent call
/// fails with [`Error::StreamBusy`] rather than queueing behind the first;
/// connections sharing the device-wide data stream must take turns.
///
/// # Closing
///
/// [`close`](Self::close) is idempotent and also runs on drop. It cancels
/// the reader, wakes an in-flight `next` with [`Error::Cancelled`] and
/// discards whatever was still buffered.
///
/// # Example
///
/// ```ignore
/// let stream = EventStream::open("FetchAclData", facade.fetch_acl_data().await?, BufferPolicy::default());
/// let packet = stream.next(Duration::from_secs(1)).await?;
/// stream.close();
/// ```
pub struct EventStream<E: Event> {
    id: StreamId,
    name: Cow<'static, str>,
    inbox: tokio::sync::Mutex<Inbox<E>>,
    cancel_token: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    default_timeout: Duration,
}

impl<E: Event> fmt::Debug for EventStream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<E: Event> EventStream<E> {
    /// Start reading `source` in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open<S>(name: impl Into<Cow<'static, str>>, source: S, policy: BufferPolicy) -> Self
    where
        S: Stream<Item = Result<E>> + Send + 'static,
    {
        let id = StreamId::new();
        let name = name.into();
        let (feed, inbox) = inbox::channel(policy);
        let cancel_token = CancellationToken::new();

        let reader = tokio::spawn(pump(
            id,
            name.clone(),
            source.boxed(),
            feed,
            cancel_token.clone(),
        ));
        tracing::debug!(stream = %id, name = %name, buffer = %policy, "stream opened");

        Self {
            id,
            name,
            inbox: tokio::sync::Mutex::new(inbox),
            cancel_token,
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the wait used by assertions on this stream that do not call
    /// [`within`](crate::Emits::within).
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait at most `timeout` for the next event and remove it from the buffer.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] when nothing arrived in time
    /// - [`Error::Cancelled`] when the stream is or becomes closed
    /// - [`Error::Exhausted`] when the remote side ended the channel and
    ///   every buffered event was consumed
    /// - [`Error::Rpc`] when the channel itself reported a failure
    /// - [`Error::StreamBusy`] when another drain is in flight
    pub async fn next(&self, timeout: Duration) -> Result<E> {
        if self.is_closed() {
            return Err(Error::cancelled());
        }
        let mut inbox = self
            .inbox
            .try_lock()
            .map_err(|_| Error::StreamBusy(self.name.to_string()))?;

        select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(Error::cancelled()),
            received = tokio::time::timeout(timeout, inbox.recv()) => match received {
                Ok(Some(Ok(event))) => {
                    tracing::trace!(stream = %self.id, name = %self.name, ?event, "event consumed");
                    Ok(event)
                }
                Ok(Some(Err(e))) => Err(e),
                Ok(None) => Err(Error::exhausted()),
                Err(_) => Err(Error::timed_out(timeout)),
            },
        }
    }

    /// Remove the oldest buffered event if it satisfies `predicate`.
    ///
    /// Never waits: returns `Ok(None)` when the buffer is empty or its head
    /// does not match, leaving the head in place for the next read.
    pub fn next_if(&self, predicate: impl Fn(&E) -> bool) -> Result<Option<E>> {
        if self.is_closed() {
            return Err(Error::cancelled());
        }
        let mut inbox = self
            .inbox
            .try_lock()
            .map_err(|_| Error::StreamBusy(self.name.to_string()))?;
        inbox.take_if(predicate)
    }

    /// Stop reading and release the channel. Safe to call repeatedly.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_token.cancel();
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
        // An in-flight `next` holds the inbox; it wakes on the token and the
        // buffer goes away with the stream.
        let discarded = self
            .inbox
            .try_lock()
            .map(|mut inbox| inbox.discard())
            .unwrap_or_default();
        tracing::debug!(stream = %self.id, name = %self.name, discarded, "stream closed");
    }
}

impl<E: Event> EventSource for EventStream<E> {
    type Event = E;

    async fn next(&self, timeout: Duration) -> Result<E> {
        EventStream::next(self, timeout).await
    }

    fn close(&self) {
        EventStream::close(self)
    }

    fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

impl<E: Event> Drop for EventStream<E> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Background reader: copy the RPC channel into the buffer until the
/// channel ends, fails, or the stream is closed.
async fn pump<E: Event>(
    id: StreamId,
    name: Cow<'static, str>,
    mut source: BoxStream<'static, Result<E>>,
    feed: Feed<E>,
    cancel_token: CancellationToken,
) {
    let mut delivered = 0usize;
    loop {
        let item = select! {
            biased;
            _ = cancel_token.cancelled() => break,
            item = source.next() => item,
        };
        let Some(item) = item else {
            tracing::debug!(stream = %id, name = %name, delivered, "remote ended the stream");
            break;
        };
        let failed = item.is_err();
        if let Err(e) = &item {
            tracing::warn!(stream = %id, name = %name, error = %e, "stream reported an error");
        }
        let pushed = select! {
            biased;
            _ = cancel_token.cancelled() => false,
            pushed = feed.push(item) => pushed,
        };
        if !pushed || failed {
            break;
        }
        delivered += 1;
    }
}
