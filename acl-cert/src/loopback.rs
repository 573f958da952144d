//! An in-process [`AclManagerFacade`] standing in for a real device.
//!
//! The test plays the controller: it decides when an outgoing connection
//! completes, when a remote peer connects, and what ACL data arrives.
//! Everything the harness sends is recorded for inspection.
//!
//! ```ignore
//! let facade = LoopbackFacade::new();
//! let dut = AclManager::new(facade.clone(), Config::default()).await?;
//!
//! let connection = dut.initiate_connection(peer).await?;
//! let handle = facade.complete_outgoing().expect("a pending connection");
//! facade.deliver_acl(handle, b"Hello".to_vec());
//! ```

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures_util::StreamExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    Error, Result, RpcStream,
    acl::{AclManagerFacade, Transport},
    hci::{
        AclData, AddressWithType, ConnectionComplete, ConnectionEvent, DisconnectReason,
        LeConnectionComplete, Role, packets::SUCCESS,
    },
};

/// Errors the loopback reports through [`Error::Rpc`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopbackError {
    #[error("no live connection with handle {0:#05x}")]
    InvalidHandle(u16),

    #[error("{0} can only be fetched once")]
    AlreadyFetched(&'static str),
}

const ACL_LINK: u8 = 0x01;
const MAX_HANDLE: u16 = 0x0eff;

type Feed<T> = UnboundedSender<Result<T>>;

struct Inner {
    transport: Transport,
    next_handle: u16,
    live: HashSet<u16>,
    acl_feed: Option<Feed<AclData>>,
    acl_rx: Option<UnboundedReceiver<Result<AclData>>>,
    incoming_feed: Feed<ConnectionEvent>,
    incoming_rx: Option<UnboundedReceiver<Result<ConnectionEvent>>>,
    incoming_fetches: usize,
    pending: VecDeque<(AddressWithType, Feed<ConnectionEvent>)>,
    // Setup streams of failed attempts stay open, like the device's.
    failed: Vec<Feed<ConnectionEvent>>,
    sent: Vec<AclData>,
    disconnected: Vec<(u16, DisconnectReason)>,
}

impl Inner {
    fn allocate_handle(&mut self) -> u16 {
        let handle = self.next_handle;
        self.next_handle = if handle >= MAX_HANDLE { 1 } else { handle + 1 };
        self.live.insert(handle);
        handle
    }

    fn complete_event(
        &self,
        status: u8,
        handle: u16,
        peer: AddressWithType,
        role: Role,
    ) -> ConnectionEvent {
        let raw = match self.transport {
            Transport::Classic => ConnectionComplete {
                status,
                handle,
                address: peer.address,
                link_type: ACL_LINK,
                encryption_enabled: false,
            }
            .encode(),
            Transport::Le => LeConnectionComplete {
                status,
                handle,
                role,
                peer_address_type: peer.address_type,
                peer_address: peer.address,
            }
            .encode(),
        };
        ConnectionEvent::new(raw)
    }

    fn require_live(&self, handle: u16) -> Result {
        if self.live.contains(&handle) {
            Ok(())
        } else {
            Err(Error::rpc(LoopbackError::InvalidHandle(handle)))
        }
    }
}

/// Cloneable handle on a fake ACL manager. Clones share state.
#[derive(Clone)]
pub struct LoopbackFacade {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for LoopbackFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("LoopbackFacade")
            .field("transport", &inner.transport)
            .field("live", &inner.live)
            .field("pending", &inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl Default for LoopbackFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackFacade {
    /// Classic transport.
    pub fn new() -> Self {
        Self::with_transport(Transport::Classic)
    }

    pub fn le() -> Self {
        Self::with_transport(Transport::Le)
    }

    pub fn with_transport(transport: Transport) -> Self {
        let (acl_feed, acl_rx) = mpsc::unbounded_channel();
        let (incoming_feed, incoming_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                transport,
                next_handle: 1,
                live: HashSet::new(),
                acl_feed: Some(acl_feed),
                acl_rx: Some(acl_rx),
                incoming_feed,
                incoming_rx: Some(incoming_rx),
                incoming_fetches: 0,
                pending: VecDeque::new(),
                failed: Vec::new(),
                sent: Vec::new(),
                disconnected: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Complete the oldest pending outgoing connection and return its
    /// handle, or `None` if nothing is pending.
    pub fn complete_outgoing(&self) -> Option<u16> {
        let mut inner = self.lock();
        let (peer, feed) = inner.pending.pop_front()?;
        let handle = inner.allocate_handle();
        let event = inner.complete_event(SUCCESS, handle, peer, Role::Central);
        let _ = feed.send(Ok(event));
        tracing::debug!(handle, %peer, "outgoing connection completed");
        Some(handle)
    }

    /// Fail the oldest pending outgoing connection with `status`.
    ///
    /// The setup stream stays open afterwards, so a wait for completion
    /// runs into its timeout. Returns `false` if nothing is pending.
    pub fn fail_outgoing(&self, status: u8) -> bool {
        let mut inner = self.lock();
        let Some((peer, feed)) = inner.pending.pop_front() else {
            return false;
        };
        let event = inner.complete_event(status, 0, peer, Role::Central);
        let _ = feed.send(Ok(event));
        inner.failed.push(feed);
        tracing::debug!(status, %peer, "outgoing connection failed");
        true
    }

    /// A remote peer at `peer` connects. Returns the new handle, or `None`
    /// once the incoming-connection stream was dropped.
    pub fn incoming_connection(&self, peer: impl Into<AddressWithType>) -> Option<u16> {
        let peer = peer.into();
        let mut inner = self.lock();
        if inner.incoming_feed.is_closed() {
            return None;
        }
        let handle = inner.allocate_handle();
        let event = inner.complete_event(SUCCESS, handle, peer, Role::Peripheral);
        inner.incoming_feed.send(Ok(event)).ok()?;
        tracing::debug!(handle, %peer, "incoming connection");
        Some(handle)
    }

    /// Deliver ACL data received on `handle`. Returns `false` if the data
    /// stream is gone.
    pub fn deliver_acl(&self, handle: u16, payload: impl Into<Vec<u8>>) -> bool {
        let inner = self.lock();
        match &inner.acl_feed {
            Some(feed) => feed.send(Ok(AclData::new(handle, payload))).is_ok(),
            None => false,
        }
    }

    /// Report a failure on the data stream; the stream ends after it.
    pub fn fail_acl_stream(&self, error: Error) {
        let mut inner = self.lock();
        if let Some(feed) = inner.acl_feed.take() {
            let _ = feed.send(Err(error));
        }
    }

    /// End the data stream from the remote side.
    pub fn end_acl_stream(&self) {
        self.lock().acl_feed = None;
    }

    /// Everything sent with `SendAclData`, in order.
    pub fn sent(&self) -> Vec<AclData> {
        self.lock().sent.clone()
    }

    /// Every `Disconnect` request, in order.
    pub fn disconnected(&self) -> Vec<(u16, DisconnectReason)> {
        self.lock().disconnected.clone()
    }

    /// How many times `FetchIncomingConnection` was called.
    pub fn incoming_fetches(&self) -> usize {
        self.lock().incoming_fetches
    }
}

impl AclManagerFacade for LoopbackFacade {
    async fn create_connection(&self, peer: AddressWithType) -> Result<RpcStream<ConnectionEvent>> {
        let (feed, rx) = mpsc::unbounded_channel();
        self.lock().pending.push_back((peer, feed));
        tracing::debug!(%peer, "create connection");
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn fetch_incoming_connection(&self) -> Result<RpcStream<ConnectionEvent>> {
        // one scheduler round trip, like a real RPC
        tokio::task::yield_now().await;
        let mut inner = self.lock();
        inner.incoming_fetches += 1;
        let rx = inner
            .incoming_rx
            .take()
            .ok_or_else(|| Error::rpc(LoopbackError::AlreadyFetched("FetchIncomingConnection")))?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn fetch_acl_data(&self) -> Result<RpcStream<AclData>> {
        let rx = self
            .lock()
            .acl_rx
            .take()
            .ok_or_else(|| Error::rpc(LoopbackError::AlreadyFetched("FetchAclData")))?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn send_acl_data(&self, data: AclData) -> Result {
        let mut inner = self.lock();
        inner.require_live(data.handle)?;
        inner.sent.push(data);
        Ok(())
    }

    async fn disconnect(&self, handle: u16, reason: DisconnectReason) -> Result {
        let mut inner = self.lock();
        inner.require_live(handle)?;
        inner.live.remove(&handle);
        inner.disconnected.push((handle, reason));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        BufferPolicy, EventStream, assert_that,
        hci::{Address, HciCaptures},
    };

    fn peer() -> Address {
        Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])
    }

    #[tokio::test]
    async fn outgoing_completion_reaches_setup_stream() {
        let facade = LoopbackFacade::new();
        let setup = EventStream::open(
            "setup",
            facade.create_connection(peer().into()).await.unwrap(),
            BufferPolicy::default(),
        );
        let handle = facade.complete_outgoing().unwrap();

        let complete = HciCaptures::connection_complete();
        assert_that(&setup).emits(&complete).await.unwrap();
        assert_eq!(complete.get().unwrap().handle, handle);
        assert_eq!(complete.get().unwrap().address, peer());
    }

    #[tokio::test]
    async fn failed_attempt_keeps_setup_stream_open() {
        let facade = LoopbackFacade::new();
        let setup = EventStream::open(
            "setup",
            facade.create_connection(peer().into()).await.unwrap(),
            BufferPolicy::default(),
        );
        assert!(facade.fail_outgoing(0x04));

        let failed = setup.next(Duration::from_secs(1)).await.unwrap();
        assert_eq!(ConnectionComplete::parse(&failed.event).unwrap().status, 0x04);
        assert!(setup.next(Duration::from_millis(50)).await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn nothing_pending_means_no_completion() {
        let facade = LoopbackFacade::new();
        assert_eq!(facade.complete_outgoing(), None);
        assert!(!facade.fail_outgoing(0x04));
    }

    #[tokio::test]
    async fn data_streams_fetch_once() {
        let facade = LoopbackFacade::new();
        assert!(facade.fetch_acl_data().await.is_ok());
        assert!(matches!(facade.fetch_acl_data().await, Err(Error::Rpc(_))));
        assert!(facade.fetch_incoming_connection().await.is_ok());
        assert!(facade.fetch_incoming_connection().await.is_err());
        assert_eq!(facade.incoming_fetches(), 2);
    }

    #[tokio::test]
    async fn unknown_handles_are_rejected() {
        let facade = LoopbackFacade::new();
        let err = facade.send_acl_data(AclData::new(7, b"x".to_vec())).await.unwrap_err();
        assert!(err.to_string().contains("0x007"), "{err}");
        assert!(facade.disconnect(7, DisconnectReason::default()).await.is_err());
        assert!(facade.sent().is_empty());
    }

    #[tokio::test]
    async fn ended_data_stream_is_exhausted() {
        let facade = LoopbackFacade::new();
        let stream = EventStream::open(
            "acl",
            facade.fetch_acl_data().await.unwrap(),
            BufferPolicy::Unbounded,
        );
        assert!(facade.deliver_acl(1, b"last".to_vec()));
        facade.end_acl_stream();
        assert!(!facade.deliver_acl(1, b"dropped".to_vec()));

        assert_eq!(stream.next(Duration::from_secs(1)).await.unwrap().payload, b"last");
        assert!(stream.next(Duration::from_secs(1)).await.unwrap_err().is_exhausted());
    }

    #[tokio::test]
    async fn failed_data_stream_reports_then_ends() {
        let facade = LoopbackFacade::new();
        let stream = EventStream::open(
            "acl",
            facade.fetch_acl_data().await.unwrap(),
            BufferPolicy::default(),
        );
        facade.fail_acl_stream(Error::rpc(LoopbackError::InvalidHandle(3)));

        let err = stream.next(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Rpc(_)), "got {err:?}");
        assert!(stream.next(Duration::from_secs(1)).await.unwrap_err().is_exhausted());
    }

    #[tokio::test]
    async fn le_incoming_connection_is_peripheral() {
        let facade = LoopbackFacade::le();
        let incoming = EventStream::open(
            "incoming",
            facade.fetch_incoming_connection().await.unwrap(),
            BufferPolicy::default(),
        );
        let handle = facade.incoming_connection(peer()).unwrap();

        let complete = HciCaptures::le_connection_complete();
        assert_that(&incoming).emits(&complete).await.unwrap();
        assert_eq!(complete.get().unwrap().handle, handle);
        assert_eq!(complete.get().unwrap().role, Role::Peripheral);
    }
}
