use std::{
    fmt,
    sync::{
        OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::{
    Error, EventSource, EventStream, Result, assert_that,
    hci::{AclData, AddressWithType, ConnectionEvent, DisconnectReason},
};

use super::{AclManagerFacade, Transport};

/// Lifecycle of an [`AclConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created; the handle is not known yet.
    Pending,
    /// The handle is bound; data can be sent.
    Established,
    /// Released. Terminal.
    Closed,
}

/// One ACL link on the device under test.
///
/// Obtained from [`AclManager::initiate_connection`](super::AclManager::initiate_connection)
/// (starts [`Pending`](ConnectionState::Pending)) or
/// [`AclManager::accept_connection`](super::AclManager::accept_connection)
/// (starts [`Established`](ConnectionState::Established)).
///
/// The handle is write-once. Received data is read from the manager's
/// device-wide ACL stream: a connection is an [`EventSource`] over
/// [`AclData`], so `assert_that(&connection).emits(..)` works directly.
/// The stream is shared, so two connections must not drain concurrently.
///
/// Closing releases the private setup stream (if any) but never the shared
/// data stream. Dropping the connection closes it.
pub struct AclConnection<'m, F: AclManagerFacade> {
    facade: &'m F,
    acl_stream: &'m EventStream<AclData>,
    setup_stream: Option<EventStream<ConnectionEvent>>,
    peer: Option<AddressWithType>,
    transport: Transport,
    timeout: Duration,
    handle: OnceLock<u16>,
    closed: AtomicBool,
}

impl<F: AclManagerFacade> fmt::Debug for AclConnection<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclConnection")
            .field("peer", &self.peer)
            .field("transport", &self.transport)
            .field("handle", &self.handle.get())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<'m, F: AclManagerFacade> AclConnection<'m, F> {
    pub(crate) fn initiated(
        facade: &'m F,
        acl_stream: &'m EventStream<AclData>,
        setup_stream: EventStream<ConnectionEvent>,
        peer: AddressWithType,
        transport: Transport,
        timeout: Duration,
    ) -> Self {
        Self {
            facade,
            acl_stream,
            setup_stream: Some(setup_stream),
            peer: Some(peer),
            transport,
            timeout,
            handle: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn accepted(
        facade: &'m F,
        acl_stream: &'m EventStream<AclData>,
        handle: u16,
        transport: Transport,
        timeout: Duration,
    ) -> Self {
        Self {
            facade,
            acl_stream,
            setup_stream: None,
            peer: None,
            transport,
            timeout,
            handle: OnceLock::from(handle),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Acquire) {
            ConnectionState::Closed
        } else if self.handle.get().is_some() {
            ConnectionState::Established
        } else {
            ConnectionState::Pending
        }
    }

    /// The connection handle, once established.
    pub fn handle(&self) -> Option<u16> {
        self.handle.get().copied()
    }

    /// The remote address, for connections this side initiated.
    pub fn peer(&self) -> Option<AddressWithType> {
        self.peer
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Wait on the setup stream for the connection-complete event and bind
    /// the handle it carries.
    ///
    /// Returns the handle immediately if it is already bound.
    ///
    /// # Errors
    ///
    /// [`Error::Precondition`] on a closed connection or one with no setup
    /// stream; otherwise whatever the drain reports (timeout, cancellation,
    /// remote end of stream).
    pub async fn wait_for_connection_complete(&self) -> Result<u16> {
        if self.state() == ConnectionState::Closed {
            return Err(Error::precondition("connection is closed"));
        }
        if let Some(handle) = self.handle() {
            return Ok(handle);
        }
        let Some(setup) = &self.setup_stream else {
            return Err(Error::precondition("connection has no setup stream"));
        };

        let complete = self.transport.connection_complete();
        assert_that(setup)
            .emits(&complete)
            .within(self.timeout)
            .await?;
        let handle = complete.into_value()?;
        self.bind_handle(handle)?;

        tracing::debug!(handle, peer = ?self.peer, transport = %self.transport, "connection established");
        Ok(handle)
    }

    /// Send one ACL payload on this connection.
    ///
    /// # Errors
    ///
    /// [`Error::Precondition`] unless the connection is
    /// [`Established`](ConnectionState::Established).
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result {
        let handle = self.established_handle("send")?;
        let data = AclData::new(handle, data);
        tracing::trace!(?data, "sending");
        self.facade.send_acl_data(data).await
    }

    /// Ask the device to disconnect the link, then close the connection.
    pub async fn disconnect(&self, reason: DisconnectReason) -> Result {
        let handle = self.established_handle("disconnect")?;
        self.facade.disconnect(handle, reason).await?;
        tracing::debug!(handle, ?reason, "disconnect requested");
        self.close();
        Ok(())
    }

    /// Release the setup stream. Safe to call in any state, any number of times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(setup) = &self.setup_stream {
            setup.close();
        }
        tracing::debug!(handle = ?self.handle(), "connection closed");
    }

    fn bind_handle(&self, handle: u16) -> Result {
        self.handle
            .set(handle)
            .map_err(|_| Error::precondition("connection handle is already bound"))
    }

    fn established_handle(&self, operation: &str) -> Result<u16> {
        match (self.state(), self.handle()) {
            (ConnectionState::Established, Some(handle)) => Ok(handle),
            (state, _) => Err(Error::precondition(format!(
                "{operation} requires an established connection, state is {state:?}"
            ))),
        }
    }
}

impl<F: AclManagerFacade> EventSource for AclConnection<'_, F> {
    type Event = AclData;

    async fn next(&self, timeout: Duration) -> Result<AclData> {
        self.acl_stream.next(timeout).await
    }

    fn close(&self) {
        AclConnection::close(self)
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }
}

impl<F: AclManagerFacade> Drop for AclConnection<'_, F> {
    fn drop(&mut self) {
        self.close();
    }
}
