use tokio::sync::mpsc::{
    self, Receiver, Sender, UnboundedReceiver, UnboundedSender,
    error::TryRecvError,
};

use crate::{BufferPolicy, Result};

/// Producer half, owned by the background reader.
pub(crate) enum Feed<E> {
    Bounded(Sender<Result<E>>),
    Unbounded(UnboundedSender<Result<E>>),
}

impl<E> Feed<E> {
    /// Push one item, waiting for room when bounded.
    ///
    /// Returns `false` once the consumer side is gone.
    pub(crate) async fn push(&self, item: Result<E>) -> bool {
        match self {
            Feed::Bounded(tx) => tx.send(item).await.is_ok(),
            Feed::Unbounded(tx) => tx.send(item).is_ok(),
        }
    }
}

enum Buffer<E> {
    Bounded(Receiver<Result<E>>),
    Unbounded(UnboundedReceiver<Result<E>>),
}

/// Consumer half, guarded by the stream's lock.
///
/// `head` holds an event pulled for a peek that did not match.
pub(crate) struct Inbox<E> {
    buffer: Buffer<E>,
    head: Option<E>,
}

pub(crate) fn channel<E>(policy: BufferPolicy) -> (Feed<E>, Inbox<E>) {
    let (feed, buffer) = match policy.capacity() {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (Feed::Bounded(tx), Buffer::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Feed::Unbounded(tx), Buffer::Unbounded(rx))
        }
    };
    (feed, Inbox { buffer, head: None })
}

impl<E> Inbox<E> {
    /// Wait for the next item. `None` once the reader finished and the
    /// buffer is empty.
    pub(crate) async fn recv(&mut self) -> Option<Result<E>> {
        if let Some(event) = self.head.take() {
            return Some(Ok(event));
        }
        match &mut self.buffer {
            Buffer::Bounded(rx) => rx.recv().await,
            Buffer::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Look at the head without waiting; remove it only if `predicate` holds.
    pub(crate) fn take_if(&mut self, predicate: impl Fn(&E) -> bool) -> Result<Option<E>> {
        if self.head.is_none() {
            let next = match &mut self.buffer {
                Buffer::Bounded(rx) => rx.try_recv(),
                Buffer::Unbounded(rx) => rx.try_recv(),
            };
            match next {
                Ok(Ok(event)) => self.head = Some(event),
                Ok(Err(e)) => return Err(e),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(None),
            }
        }
        match self.head.take() {
            Some(event) if predicate(&event) => Ok(Some(event)),
            other => {
                self.head = other;
                Ok(None)
            }
        }
    }

    /// Drop everything buffered and refuse further pushes.
    pub(crate) fn discard(&mut self) -> usize {
        let mut dropped = usize::from(self.head.take().is_some());
        match &mut self.buffer {
            Buffer::Bounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
            }
            Buffer::Unbounded(rx) => {
                rx.close();
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
            }
        }
        dropped
    }
}
