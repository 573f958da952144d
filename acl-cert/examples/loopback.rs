//! ACL certification scenarios against the in-process loopback device.
//!
//! The loopback facade plays both the controller and the remote peer, so
//! each scenario drives the "cert" side by hand:
//!
//! - **dut_connects**: the DUT initiates, the cert completes the link and
//!   exchanges one payload each way
//! - **cert_connects**: the DUT listens and accepts an incoming link
//! - **recombination**: a short and a 1000-byte payload must arrive in order
//!
//! Run with `RUST_LOG=acl_cert=debug` to watch streams open, drain and close:
//!
//! ```text
//! cargo run --example loopback --features loopback
//! ```

use std::time::Duration;

use acl_cert::{
    Config, Result, assert_that,
    acl::AclManager,
    hci::{AclMatchers, Address},
    loopback::LoopbackFacade,
};
use tracing_subscriber::EnvFilter;

const CERT_ADDRESS: Address = Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

async fn dut_connects(config: &Config) -> Result {
    let cert = LoopbackFacade::new();
    let dut = AclManager::new(cert.clone(), config.clone()).await?;

    let dut_acl = dut.initiate_connection(CERT_ADDRESS).await?;
    let Some(handle) = cert.complete_outgoing() else {
        return Err(acl_cert::Error::precondition("no pending connection"));
    };
    cert.deliver_acl(handle, b"\x26\x00\x07\x00This is just SomeAclData from the Cert".to_vec());

    dut_acl.wait_for_connection_complete().await?;
    dut_acl
        .send(b"\x29\x00\x07\x00This is just SomeMoreAclData from the DUT".to_vec())
        .await?;

    assert_that(&dut_acl)
        .emits(AclMatchers::payload_contains(b"SomeAclData".to_vec()))
        .await?;
    tracing::info!(handle, sent = cert.sent().len(), "dut_connects passed");
    Ok(())
}

async fn cert_connects(config: &Config) -> Result {
    let cert = LoopbackFacade::new();
    let dut = AclManager::new(cert.clone(), config.clone()).await?;

    dut.listen_for_incoming_connections().await?;
    let Some(handle) = cert.incoming_connection(CERT_ADDRESS) else {
        return Err(acl_cert::Error::precondition("incoming stream is gone"));
    };

    let dut_acl = dut.accept_connection().await?;
    dut_acl
        .send(b"\x29\x00\x07\x00This is just SomeMoreAclData from the DUT".to_vec())
        .await?;
    cert.deliver_acl(handle, b"\x26\x00\x07\x00This is just SomeAclData from the Cert".to_vec());

    assert_that(&dut_acl)
        .emits(AclMatchers::payload_contains(b"SomeAclData".to_vec()))
        .await?;
    tracing::info!(handle, "cert_connects passed");
    Ok(())
}

async fn recombination(config: &Config) -> Result {
    let cert = LoopbackFacade::new();
    let dut = AclManager::new(cert.clone(), config.clone()).await?;

    let dut_acl = dut.initiate_connection(CERT_ADDRESS).await?;
    let Some(handle) = cert.complete_outgoing() else {
        return Err(acl_cert::Error::precondition("no pending connection"));
    };
    dut_acl.wait_for_connection_complete().await?;

    cert.deliver_acl(handle, b"\x06\x00\x07\x00Hello!".to_vec());
    let mut large = b"\xe8\x03\x07\x00".to_vec();
    large.extend(b"Hello".repeat(200));
    cert.deliver_acl(handle, large);

    assert_that(&dut_acl)
        .emits(AclMatchers::payload_contains(b"Hello!".to_vec()))
        .and(AclMatchers::payload_contains(b"Hello".repeat(200)))
        .in_order()
        .await?;
    tracing::info!(handle, "recombination passed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::default().with_default_timeout(Duration::from_secs(2));

    dut_connects(&config).await?;
    cert_connects(&config).await?;
    recombination(&config).await?;
    Ok(())
}
