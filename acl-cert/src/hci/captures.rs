use std::fmt::Write;

use crate::{Capture, EventMatcher};

use super::packets::{
    AclData, ConnectionComplete, ConnectionEvent, ConnectionRequest, LeConnectionComplete,
    READ_BD_ADDR_OPCODE, ReadBdAddrComplete, SUCCESS, event_code, subevent_code,
};

/// Captures over raw HCI events.
///
/// Each capture checks the event shape first and only then parses, so an
/// event that merely resembles the target never poisons the capture.
pub struct HciCaptures;

impl HciCaptures {
    /// A successful Connection Complete.
    ///
    /// Failed attempts (non-zero status) are not matched.
    pub fn connection_complete() -> Capture<ConnectionEvent, ConnectionComplete> {
        Capture::parsed("ConnectionComplete", |packet: &ConnectionEvent| {
            let header = [
                event_code::CONNECTION_COMPLETE,
                ConnectionComplete::PARAMETERS_LEN as u8,
                SUCCESS,
            ];
            if !packet.event.starts_with(&header) {
                return None;
            }
            ConnectionComplete::parse(&packet.event).ok()
        })
    }

    /// A successful LE Connection Complete or LE Enhanced Connection Complete.
    pub fn le_connection_complete() -> Capture<ConnectionEvent, LeConnectionComplete> {
        Capture::parsed("LeConnectionComplete", |packet: &ConnectionEvent| {
            match packet.subevent_code() {
                Some(subevent_code::LE_CONNECTION_COMPLETE)
                | Some(subevent_code::LE_ENHANCED_CONNECTION_COMPLETE) => {
                    LeConnectionComplete::parse(&packet.event)
                        .ok()
                        .filter(|complete| complete.status == SUCCESS)
                }
                _ => None,
            }
        })
    }

    pub fn connection_request() -> Capture<ConnectionEvent, ConnectionRequest> {
        Capture::parsed("ConnectionRequest", |packet: &ConnectionEvent| {
            let header = [
                event_code::CONNECTION_REQUEST,
                ConnectionRequest::PARAMETERS_LEN as u8,
            ];
            if !packet.event.starts_with(&header) {
                return None;
            }
            ConnectionRequest::parse(&packet.event).ok()
        })
    }

    pub fn read_bd_addr_complete() -> Capture<ConnectionEvent, ReadBdAddrComplete> {
        Capture::parsed("ReadBdAddrComplete", |packet: &ConnectionEvent| {
            let [lo, hi] = READ_BD_ADDR_OPCODE.to_le_bytes();
            match packet.event.as_slice() {
                [event_code::COMMAND_COMPLETE, _, _, l, h, ..] if *l == lo && *h == hi => {
                    ReadBdAddrComplete::parse(&packet.event).ok()
                }
                _ => None,
            }
        })
    }
}

/// Matchers over ACL data.
pub struct AclMatchers;

impl AclMatchers {
    /// Payload contains `needle` anywhere.
    pub fn payload_contains(needle: impl Into<Vec<u8>>) -> EventMatcher<AclData> {
        let needle = needle.into();
        let description = format!("payload contains {}", escape(&needle));
        EventMatcher::by_event(move |packet: &AclData| packet.payload_contains(&needle))
            .named(description)
    }

    /// Packet arrived on connection `handle`.
    pub fn handle(handle: u16) -> EventMatcher<AclData> {
        EventMatcher::by_event(move |packet: &AclData| packet.handle == handle)
            .named(format!("handle {handle:#05x}"))
    }
}

const MAX_QUOTED_LEN: usize = 64;
const TRUNCATED_LEN: usize = 60;

/// Quote `bytes` with ASCII escapes. Long needles keep a prefix of whole
/// escapes and the total length.
fn escape(bytes: &[u8]) -> String {
    let escaped_len: usize = bytes.iter().map(|byte| byte.escape_ascii().len()).sum();
    let mut out = String::with_capacity(escaped_len.min(MAX_QUOTED_LEN) + 2);
    out.push('"');
    if escaped_len + 2 <= MAX_QUOTED_LEN {
        out.extend(bytes.escape_ascii().map(char::from));
        out.push('"');
        return out;
    }
    for byte in bytes {
        let escaped = byte.escape_ascii();
        if out.len() + escaped.len() > TRUNCATED_LEN {
            break;
        }
        out.extend(escaped.map(char::from));
    }
    let _ = write!(out, "...\" ({} bytes)", bytes.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::{Address, AddressType, Role};

    fn peer() -> Address {
        Address::new([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01])
    }

    fn complete(status: u8, handle: u16) -> ConnectionEvent {
        ConnectionEvent::new(
            ConnectionComplete {
                status,
                handle,
                address: peer(),
                link_type: 0x01,
                encryption_enabled: false,
            }
            .encode(),
        )
    }

    #[test]
    fn connection_complete_ignores_failed_attempts() {
        let capture = HciCaptures::connection_complete();
        assert!(!capture.try_match(&complete(0x04, 0x0001)));
        assert!(capture.try_match(&complete(SUCCESS, 0x0002)));
        assert_eq!(capture.get().unwrap().handle, 0x0002);
    }

    #[test]
    fn connection_complete_ignores_other_events() {
        let capture = HciCaptures::connection_complete();
        let request = ConnectionEvent::new(
            ConnectionRequest {
                address: peer(),
                class_of_device: [0; 3],
                link_type: 0x01,
            }
            .encode(),
        );
        assert!(!capture.try_match(&request));
        assert!(HciCaptures::connection_request().try_match(&request));
    }

    #[test]
    fn le_connection_complete_yields_handle() {
        let capture = HciCaptures::le_connection_complete();
        let event = ConnectionEvent::new(
            LeConnectionComplete {
                status: SUCCESS,
                handle: 0x0e01,
                role: Role::Central,
                peer_address_type: AddressType::PublicDevice,
                peer_address: peer(),
            }
            .encode(),
        );
        assert!(!capture.try_match(&complete(SUCCESS, 1)));
        assert!(capture.try_match(&event));
        assert_eq!(capture.get().unwrap().handle, 0x0e01);
    }

    #[test]
    fn read_bd_addr_complete_yields_address() {
        let capture = HciCaptures::read_bd_addr_complete();
        let event = ConnectionEvent::new(
            ReadBdAddrComplete {
                status: SUCCESS,
                address: peer(),
            }
            .encode(),
        );
        assert!(capture.try_match(&event));
        assert_eq!(capture.get().unwrap().address, peer());
    }

    #[test]
    fn payload_matcher_describes_needle() {
        let matcher = AclMatchers::payload_contains(b"Hello!".to_vec());
        assert_eq!(matcher.description(), "payload contains \"Hello!\"");
        assert!(matcher.matches(&AclData::new(1, b"\x06\x00\x07\x00Hello!".to_vec())));

        let long = AclMatchers::payload_contains(b"Hello".repeat(200));
        assert!(long.description().ends_with("(1000 bytes)"));
    }

    #[test]
    fn long_binary_needle_keeps_whole_escapes() {
        let matcher = AclMatchers::payload_contains(vec![0x01; 30]);
        assert_eq!(
            matcher.description(),
            format!("payload contains \"{}...\" (30 bytes)", "\\x01".repeat(14))
        );

        let short = AclMatchers::payload_contains(b"\x00\x07ok".to_vec());
        assert_eq!(short.description(), "payload contains \"\\x00\\x07ok\"");
    }

    #[test]
    fn handle_matcher() {
        let matcher = AclMatchers::handle(0x002);
        assert!(matcher.matches(&AclData::new(0x002, Vec::new())));
        assert!(!matcher.matches(&AclData::new(0x003, Vec::new())));
    }
}
