//! Pull-based wrappers over RPC streaming channels.

mod event_source;
mod event_stream;
mod inbox;

pub use event_source::EventSource;
pub use event_stream::{EventStream, RpcStream};
