//! HCI addresses, packets and the captures used to read them.

mod address;
mod captures;
pub mod packets;

pub use address::{Address, AddressType, AddressWithType};
pub use captures::{AclMatchers, HciCaptures};
pub use packets::{
    AclData, ConnectionComplete, ConnectionEvent, ConnectionRequest, DisconnectReason,
    LeConnectionComplete, ReadBdAddrComplete, Role,
};
