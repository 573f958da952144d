//! ACL connection management on top of the remote facade.

mod connection;
mod facade;
mod manager;
mod transport;

pub use connection::{AclConnection, ConnectionState};
pub use facade::AclManagerFacade;
pub use manager::AclManager;
pub use transport::Transport;
