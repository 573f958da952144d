use std::future::Future;

use crate::{
    Result, RpcStream,
    hci::{AclData, AddressWithType, ConnectionEvent, DisconnectReason},
};

/// The RPC surface of the ACL manager facade on the device under test.
///
/// Generated stubs (or an in-process fake such as
/// [`LoopbackFacade`](crate::loopback::LoopbackFacade)) implement this
/// trait. Streaming calls hand back the raw response stream; the harness
/// wraps it in an [`EventStream`](crate::EventStream).
///
/// Methods return futures but can be implemented as `async fn` directly.
pub trait AclManagerFacade: Send + Sync {
    /// Start connecting to `peer`. The stream reports the connection outcome.
    fn create_connection(
        &self,
        peer: AddressWithType,
    ) -> impl Future<Output = Result<RpcStream<ConnectionEvent>>> + Send;

    /// Stream of connections initiated by remote peers.
    fn fetch_incoming_connection(
        &self,
    ) -> impl Future<Output = Result<RpcStream<ConnectionEvent>>> + Send;

    /// Device-wide stream of received ACL data, for every connection.
    fn fetch_acl_data(&self) -> impl Future<Output = Result<RpcStream<AclData>>> + Send;

    /// Queue `data` for transmission. Fire-and-forget.
    fn send_acl_data(&self, data: AclData) -> impl Future<Output = Result<()>> + Send;

    /// Tear down the link identified by `handle`.
    fn disconnect(
        &self,
        handle: u16,
        reason: DisconnectReason,
    ) -> impl Future<Output = Result<()>> + Send;
}
