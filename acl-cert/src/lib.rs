#![cfg_attr(docsrs, feature(doc_cfg))]
//! # acl-cert
//!
//! Event-stream assertions and ACL connection helpers for Bluetooth HCI
//! certification tests, on Tokio.
//!
//! A device under test exposes an ACL manager facade over RPC. Its streaming
//! calls (connection setup, incoming connections, received ACL data) are
//! wrapped in [`EventStream`]s that read in the background and buffer in
//! arrival order. Tests then state what the device must emit:
//!
//! ```rust,ignore
//! use acl_cert::{*, acl::AclManager, hci::AclMatchers};
//!
//! let dut = AclManager::new(facade, Config::default()).await?;
//!
//! let connection = dut.initiate_connection(cert_address).await?;
//! connection.wait_for_connection_complete().await?;
//! connection.send(b"\x29\x00\x07\x00SomeMoreAclData".to_vec()).await?;
//!
//! assert_that(&connection)
//!     .emits(AclMatchers::payload_contains(b"Hello!".to_vec()))
//!     .and(AclMatchers::payload_contains(b"Hello".repeat(200)))
//!     .in_order()
//!     .within(Duration::from_secs(5))
//!     .await?;
//! ```
//!
//! ## Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EventStream`] | Buffered, closeable wrapper over one RPC response stream |
//! | [`EventSource`] | Anything an assertion can drain (streams, connections) |
//! | [`EventMatcher`] | Named predicate over events |
//! | [`Capture`] | Predicate that keeps a typed value from the event it matched |
//! | [`assert_that`] | Entry point for `emits` expectations |
//! | [`acl::AclManager`] | Opens connections and owns the shared data stream |
//! | [`acl::AclConnection`] | One link: wait for completion, send, read |
//! | [`Config`] | Default timeout and stream buffering |
//!
//! ## Consumption
//!
//! Draining consumes: every event an assertion reads is gone from the
//! stream, matched or not. Two assertions in a row see disjoint events.
//!
//! ## Features
//!
//! - **`loopback`** - [`loopback::LoopbackFacade`], an in-process fake device
//! - **`serde`** - `Serialize`/`Deserialize` for [`Config`], [`BufferPolicy`] and addresses
//!
//! ## Examples
//!
//! - `loopback.rs` - The DUT-connects, cert-connects and reassembly scenarios
//!   against the loopback facade

pub mod acl;
mod assertion;
mod buffer_policy;
mod capture;
mod config;
mod error;
mod event;
pub mod hci;
mod label;
mod matcher;
mod stream;
mod stream_id;

#[cfg(any(test, feature = "loopback"))]
#[cfg_attr(docsrs, doc(cfg(feature = "loopback")))]
pub mod loopback;

pub use assertion::{Emits, Expected, Subject, assert_that};
pub use buffer_policy::BufferPolicy;
pub use capture::{Capture, CaptureSlot};
pub use config::{Config, DEFAULT_TIMEOUT};
pub use error::Error;
pub use event::Event;
pub use label::Label;
pub use matcher::EventMatcher;
pub use stream::{EventSource, EventStream, RpcStream};
pub use stream_id::StreamId;

/// Convenience alias for `Result<T, acl_cert::Error>`.
pub type Result<T = ()> = std::result::Result<T, Error>;
