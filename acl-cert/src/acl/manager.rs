use std::fmt;

use tokio::sync::OnceCell;

use crate::{
    Config, Error, Event, EventStream, Result, RpcStream, assert_that,
    hci::{AclData, AddressWithType, ConnectionEvent},
};

use super::{AclConnection, AclManagerFacade, Transport};

/// Test-side handle on the ACL manager of one device.
///
/// Owns the device-wide ACL data stream (opened on construction) and, once
/// [`listen_for_incoming_connections`](Self::listen_for_incoming_connections)
/// was called, the incoming-connection stream. Connections handed out by
/// the manager borrow it, so the borrow checker keeps every connection
/// inside the manager's lifetime.
///
/// # Example
///
/// ```ignore
/// let dut = AclManager::new(facade, Config::default()).await?;
///
/// let connection = dut.initiate_connection(peer_address).await?;
/// connection.wait_for_connection_complete().await?;
/// connection.send(b"\x29\x00\x07\x00Hello".to_vec()).await?;
/// assert_that(&connection).emits(AclMatchers::payload_contains(b"Reply".to_vec())).await?;
/// ```
///
/// Dropping the manager (or calling [`close`](Self::close)) closes both
/// streams. A closed manager stays closed: opening streams or connections
/// afterwards fails with [`Error::Precondition`].
pub struct AclManager<F: AclManagerFacade> {
    facade: F,
    transport: Transport,
    config: Config,
    acl_stream: EventStream<AclData>,
    incoming: OnceCell<EventStream<ConnectionEvent>>,
}

impl<F: AclManagerFacade> fmt::Debug for AclManager<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclManager")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .field("acl_stream", &self.acl_stream)
            .field("listening", &self.is_listening())
            .finish_non_exhaustive()
    }
}

impl<F: AclManagerFacade> AclManager<F> {
    /// Manager for classic (BR/EDR) connections.
    pub async fn new(facade: F, config: Config) -> Result<Self> {
        Self::with_transport(facade, Transport::Classic, config).await
    }

    /// Manager for LE connections.
    pub async fn le(facade: F, config: Config) -> Result<Self> {
        Self::with_transport(facade, Transport::Le, config).await
    }

    /// Open the shared ACL data stream for `transport`.
    pub async fn with_transport(facade: F, transport: Transport, config: Config) -> Result<Self> {
        let source = facade.fetch_acl_data().await?;
        let acl_stream = EventStream::open(
            format!("{transport} FetchAclData"),
            source,
            config.stream_buffer(),
        )
        .with_default_timeout(config.default_timeout());
        Ok(Self {
            facade,
            transport,
            config,
            acl_stream,
            incoming: OnceCell::new(),
        })
    }

    pub fn facade(&self) -> &F {
        &self.facade
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The device-wide ACL data stream shared by every connection.
    pub fn acl_stream(&self) -> &EventStream<AclData> {
        &self.acl_stream
    }

    pub fn is_listening(&self) -> bool {
        self.incoming.get().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.acl_stream.is_closed()
    }

    fn ensure_open(&self, operation: &str) -> Result {
        if self.is_closed() {
            return Err(Error::precondition(format!(
                "{operation} on a closed ACL manager"
            )));
        }
        Ok(())
    }

    fn open_stream<E: Event>(&self, name: String, source: RpcStream<E>) -> EventStream<E> {
        EventStream::open(name, source, self.config.stream_buffer())
            .with_default_timeout(self.config.default_timeout())
    }

    /// Open the incoming-connection stream. Required before
    /// [`accept_connection`](Self::accept_connection).
    ///
    /// A manager listens at most once. Further calls, concurrent ones
    /// included, reuse the first stream and never fetch again.
    pub async fn listen_for_incoming_connections(&self) -> Result {
        self.ensure_open("listen_for_incoming_connections")?;
        let incoming = self
            .incoming
            .get_or_try_init(|| async {
                let source = self.facade.fetch_incoming_connection().await?;
                Ok::<_, Error>(self.open_stream(
                    format!("{} FetchIncomingConnection", self.transport),
                    source,
                ))
            })
            .await?;
        // close() may have run while the fetch was in flight
        if self.is_closed() {
            incoming.close();
        }
        self.ensure_open("listen_for_incoming_connections")
    }

    /// Start connecting to `peer`.
    ///
    /// The returned connection is [`Pending`](super::ConnectionState::Pending)
    /// until [`AclConnection::wait_for_connection_complete`] succeeds.
    pub async fn initiate_connection(
        &self,
        peer: impl Into<AddressWithType>,
    ) -> Result<AclConnection<'_, F>> {
        self.ensure_open("initiate_connection")?;
        let peer = peer.into();
        let source = self.facade.create_connection(peer).await?;
        let setup = self.open_stream(
            format!("{} CreateConnection {}", self.transport, peer.address),
            source,
        );
        tracing::debug!(%peer, transport = %self.transport, "connection initiated");
        Ok(AclConnection::initiated(
            &self.facade,
            &self.acl_stream,
            setup,
            peer,
            self.transport,
            self.config.default_timeout(),
        ))
    }

    /// Wait for a remote peer to connect.
    ///
    /// # Errors
    ///
    /// [`Error::Precondition`] if the manager is closed or
    /// [`listen_for_incoming_connections`](Self::listen_for_incoming_connections)
    /// was not called; otherwise whatever the drain reports.
    pub async fn accept_connection(&self) -> Result<AclConnection<'_, F>> {
        self.ensure_open("accept_connection")?;
        let Some(incoming) = self.incoming.get() else {
            return Err(Error::precondition(
                "accept_connection requires listen_for_incoming_connections",
            ));
        };
        let complete = self.transport.connection_complete();
        assert_that(incoming)
            .emits(&complete)
            .within(self.config.default_timeout())
            .await?;
        let handle = complete.into_value()?;
        tracing::debug!(handle, transport = %self.transport, "connection accepted");
        Ok(AclConnection::accepted(
            &self.facade,
            &self.acl_stream,
            handle,
            self.transport,
            self.config.default_timeout(),
        ))
    }

    /// Close the data stream and the incoming-connection stream, whichever
    /// were opened. Idempotent.
    pub fn close(&self) {
        self.acl_stream.close();
        if let Some(incoming) = self.incoming.get() {
            incoming.close();
        }
    }
}

impl<F: AclManagerFacade> Drop for AclManager<F> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        Error, EventSource,
        acl::ConnectionState,
        hci::{Address, AclMatchers, DisconnectReason},
        loopback::LoopbackFacade,
    };

    fn cert_address() -> Address {
        "00:11:22:33:44:55".parse().unwrap()
    }

    fn quick() -> Config {
        Config::default().with_default_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn dut_connects() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), Config::default()).await.unwrap();

        let dut_acl = dut.initiate_connection(cert_address()).await.unwrap();
        assert_eq!(dut_acl.state(), ConnectionState::Pending);

        let handle = facade.complete_outgoing().unwrap();
        facade.deliver_acl(handle, b"\x26\x00\x07\x00This is just SomeAclData from the Cert".to_vec());

        assert_eq!(dut_acl.wait_for_connection_complete().await.unwrap(), handle);
        assert_eq!(dut_acl.state(), ConnectionState::Established);

        dut_acl
            .send(b"\x29\x00\x07\x00This is just SomeMoreAclData from the DUT".to_vec())
            .await
            .unwrap();
        assert_eq!(facade.sent().len(), 1);
        assert_eq!(facade.sent()[0].handle, handle);

        assert_that(&dut_acl)
            .emits(AclMatchers::payload_contains(b"SomeAclData".to_vec()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cert_connects() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), Config::default()).await.unwrap();

        dut.listen_for_incoming_connections().await.unwrap();
        let handle = facade.incoming_connection(cert_address()).unwrap();

        let dut_acl = dut.accept_connection().await.unwrap();
        assert_eq!(dut_acl.state(), ConnectionState::Established);
        assert_eq!(dut_acl.handle(), Some(handle));

        dut_acl.send(b"SomeMoreAclData".to_vec()).await.unwrap();
        facade.deliver_acl(handle, b"SomeAclData".to_vec());
        assert_that(&dut_acl)
            .emits(AclMatchers::payload_contains(b"SomeAclData".to_vec()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn recombined_payloads_arrive_in_order() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), Config::default()).await.unwrap();

        let dut_acl = dut.initiate_connection(cert_address()).await.unwrap();
        let handle = facade.complete_outgoing().unwrap();
        facade.deliver_acl(handle, b"\x06\x00\x07\x00Hello!".to_vec());
        let mut large = b"\xe8\x03\x07\x00".to_vec();
        large.extend(b"Hello".repeat(200));
        facade.deliver_acl(handle, large);

        dut_acl.wait_for_connection_complete().await.unwrap();
        assert_that(&dut_acl)
            .emits(AclMatchers::payload_contains(b"Hello!".to_vec()))
            .and(AclMatchers::payload_contains(b"Hello".repeat(200)))
            .in_order()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_before_connection_complete_is_rejected() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), quick()).await.unwrap();

        let dut_acl = dut.initiate_connection(cert_address()).await.unwrap();
        let err = dut_acl.send(b"too early".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::Precondition(_)), "got {err:?}");
        assert!(facade.sent().is_empty());
    }

    #[tokio::test]
    async fn accept_without_listening_is_rejected() {
        let dut = AclManager::new(LoopbackFacade::new(), quick()).await.unwrap();
        assert!(matches!(
            dut.accept_connection().await,
            Err(Error::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn listening_twice_keeps_one_stream() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), quick()).await.unwrap();
        dut.listen_for_incoming_connections().await.unwrap();
        dut.listen_for_incoming_connections().await.unwrap();
        assert_eq!(facade.incoming_fetches(), 1);
    }

    #[tokio::test]
    async fn failed_connection_attempt_times_out() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), quick()).await.unwrap();

        let dut_acl = dut.initiate_connection(cert_address()).await.unwrap();
        facade.fail_outgoing(0x04);

        let err = dut_acl.wait_for_connection_complete().await.unwrap_err();
        match err {
            Error::Timeout { unmet, scanned, .. } => {
                assert_eq!(unmet, vec!["ConnectionComplete".to_string()]);
                assert_eq!(scanned, 1);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert_eq!(dut_acl.state(), ConnectionState::Pending);
    }

    #[tokio::test]
    async fn closing_connection_leaves_shared_stream_open() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), Config::default()).await.unwrap();

        let first = dut.initiate_connection(cert_address()).await.unwrap();
        let handle = facade.complete_outgoing().unwrap();
        first.wait_for_connection_complete().await.unwrap();
        first.close();
        first.close();
        assert_eq!(first.state(), ConnectionState::Closed);
        assert!(matches!(
            first.send(b"late".to_vec()).await,
            Err(Error::Precondition(_))
        ));
        drop(first);

        assert!(!dut.acl_stream().is_closed());
        facade.deliver_acl(handle, b"still flowing".to_vec());
        assert_that(dut.acl_stream())
            .emits(AclMatchers::payload_contains(b"still flowing".to_vec()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn closing_connection_cancels_pending_setup() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), Config::default()).await.unwrap();
        let dut_acl = dut.initiate_connection(cert_address()).await.unwrap();

        let (result, _) = tokio::join!(dut_acl.wait_for_connection_complete(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            EventSource::close(&dut_acl);
        });
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn manager_close_without_listening_is_safe() {
        let dut = AclManager::new(LoopbackFacade::new(), quick()).await.unwrap();
        dut.close();
        dut.close();
        assert!(dut.acl_stream().is_closed());
        assert!(!dut.is_listening());
    }

    #[tokio::test]
    async fn manager_close_closes_both_streams() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), quick()).await.unwrap();
        dut.listen_for_incoming_connections().await.unwrap();
        dut.close();

        assert!(dut.acl_stream().is_closed());
        assert!(dut.incoming.get().unwrap().is_closed());
    }

    #[tokio::test]
    async fn closed_manager_refuses_new_work() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), quick()).await.unwrap();
        dut.close();
        assert!(dut.is_closed());

        assert!(matches!(
            dut.listen_for_incoming_connections().await,
            Err(Error::Precondition(_))
        ));
        assert!(!dut.is_listening());
        assert_eq!(facade.incoming_fetches(), 0);

        assert!(matches!(
            dut.initiate_connection(cert_address()).await,
            Err(Error::Precondition(_))
        ));
        assert_eq!(facade.complete_outgoing(), None);

        assert!(matches!(
            dut.accept_connection().await,
            Err(Error::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_listeners_share_one_fetch() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), quick()).await.unwrap();

        let (first, second) = tokio::join!(
            dut.listen_for_incoming_connections(),
            dut.listen_for_incoming_connections()
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(facade.incoming_fetches(), 1);
        assert!(dut.is_listening());
    }

    #[tokio::test]
    async fn connection_assertions_use_configured_timeout() {
        let facade = LoopbackFacade::new();
        let config = Config::default().with_default_timeout(Duration::from_millis(100));
        let dut = AclManager::new(facade.clone(), config).await.unwrap();
        dut.listen_for_incoming_connections().await.unwrap();
        facade.incoming_connection(cert_address()).unwrap();
        let dut_acl = dut.accept_connection().await.unwrap();

        let started = std::time::Instant::now();
        let err = assert_that(&dut_acl)
            .emits(AclMatchers::payload_contains(b"never".to_vec()))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1), "waited {:?}", started.elapsed());
        assert!(
            matches!(err, Error::Timeout { timeout, .. } if timeout == Duration::from_millis(100)),
            "got {err:?}"
        );

        let err = assert_that(dut.acl_stream())
            .emits(AclMatchers::payload_contains(b"never".to_vec()))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Timeout { timeout, .. } if timeout == Duration::from_millis(100)),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn disconnect_reaches_facade() {
        let facade = LoopbackFacade::new();
        let dut = AclManager::new(facade.clone(), Config::default()).await.unwrap();
        dut.listen_for_incoming_connections().await.unwrap();
        let handle = facade.incoming_connection(cert_address()).unwrap();

        let dut_acl = dut.accept_connection().await.unwrap();
        dut_acl
            .disconnect(DisconnectReason::RemoteUserTerminatedConnection)
            .await
            .unwrap();

        assert_eq!(dut_acl.state(), ConnectionState::Closed);
        assert_eq!(
            facade.disconnected(),
            vec![(handle, DisconnectReason::RemoteUserTerminatedConnection)]
        );
        assert!(matches!(
            dut_acl.send(b"after".to_vec()).await,
            Err(Error::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn le_manager_uses_le_connection_complete() {
        let facade = LoopbackFacade::le();
        let dut = AclManager::le(facade.clone(), Config::default()).await.unwrap();

        let dut_acl = dut.initiate_connection(cert_address()).await.unwrap();
        let handle = facade.complete_outgoing().unwrap();
        assert_eq!(dut_acl.wait_for_connection_complete().await.unwrap(), handle);
        assert_eq!(dut_acl.transport(), Transport::Le);
    }
}
