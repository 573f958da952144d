//! The slices of the HCI packet formats the captures need.
//!
//! Only event parameters up to the fields a certification test reads are
//! parsed; trailing parameters are ignored.

use std::{borrow::Cow, fmt};

use crate::{Error, Event, Label, Result};

use super::{Address, AddressType};

/// HCI event codes.
pub mod event_code {
    pub const CONNECTION_COMPLETE: u8 = 0x03;
    pub const CONNECTION_REQUEST: u8 = 0x04;
    pub const DISCONNECTION_COMPLETE: u8 = 0x05;
    pub const COMMAND_COMPLETE: u8 = 0x0e;
    pub const LE_META_EVENT: u8 = 0x3e;
}

/// LE meta event subevent codes.
pub mod subevent_code {
    pub const LE_CONNECTION_COMPLETE: u8 = 0x01;
    pub const LE_ENHANCED_CONNECTION_COMPLETE: u8 = 0x0a;
}

/// `Read_BD_ADDR` opcode (OGF 0x04, OCF 0x0009).
pub const READ_BD_ADDR_OPCODE: u16 = 0x1009;

/// Status code reported by successful commands and events.
pub const SUCCESS: u8 = 0x00;

const HANDLE_MASK: u16 = 0x0fff;

/// One ACL payload as delivered by `FetchAclData` or sent with `SendAclData`.
#[derive(Clone, PartialEq, Eq)]
pub struct AclData {
    pub handle: u16,
    pub payload: Vec<u8>,
}

impl AclData {
    pub fn new(handle: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            handle,
            payload: payload.into(),
        }
    }

    /// Returns true if `needle` occurs anywhere in the payload.
    pub fn payload_contains(&self, needle: &[u8]) -> bool {
        needle.is_empty() || self.payload.windows(needle.len()).any(|w| w == needle)
    }
}

impl fmt::Debug for AclData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclData")
            .field("handle", &format_args!("{:#05x}", self.handle))
            .field("len", &self.payload.len())
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .finish()
    }
}

impl Event for AclData {}

impl Label for AclData {
    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("AclData")
    }
}

/// A raw HCI event, as streamed by `CreateConnection` and
/// `FetchIncomingConnection`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub event: Vec<u8>,
}

impl ConnectionEvent {
    pub fn new(event: impl Into<Vec<u8>>) -> Self {
        Self {
            event: event.into(),
        }
    }

    pub fn code(&self) -> Option<u8> {
        self.event.first().copied()
    }

    /// Parameter bytes following the two-byte event header.
    pub fn parameters(&self) -> &[u8] {
        self.event.get(2..).unwrap_or_default()
    }

    pub fn subevent_code(&self) -> Option<u8> {
        match self.code() {
            Some(event_code::LE_META_EVENT) => self.parameters().first().copied(),
            _ => None,
        }
    }
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEvent")
            .field("label", &self.label())
            .field("event", &format_args!("{:02x?}", self.event))
            .finish()
    }
}

impl Event for ConnectionEvent {}

impl Label for ConnectionEvent {
    fn label(&self) -> Cow<'static, str> {
        use event_code::*;
        use subevent_code::*;
        match (self.code(), self.subevent_code()) {
            (Some(CONNECTION_COMPLETE), _) => Cow::Borrowed("ConnectionComplete"),
            (Some(CONNECTION_REQUEST), _) => Cow::Borrowed("ConnectionRequest"),
            (Some(DISCONNECTION_COMPLETE), _) => Cow::Borrowed("DisconnectionComplete"),
            (Some(COMMAND_COMPLETE), _) => Cow::Borrowed("CommandComplete"),
            (_, Some(LE_CONNECTION_COMPLETE)) => Cow::Borrowed("LeConnectionComplete"),
            (_, Some(LE_ENHANCED_CONNECTION_COMPLETE)) => {
                Cow::Borrowed("LeEnhancedConnectionComplete")
            }
            (Some(code), _) => Cow::Owned(format!("HciEvent({code:#04x})")),
            (None, _) => Cow::Borrowed("Empty"),
        }
    }
}

/// Check the event header and return its parameters.
fn parameters(raw: &[u8], code: u8, min_len: usize) -> Result<&[u8]> {
    let [actual, len, params @ ..] = raw else {
        return Err(Error::MalformedPacket("event shorter than its header".into()));
    };
    if *actual != code {
        return Err(Error::MalformedPacket(format!(
            "expected event {code:#04x}, got {actual:#04x}"
        )));
    }
    if usize::from(*len) != params.len() || params.len() < min_len {
        return Err(Error::MalformedPacket(format!(
            "event {code:#04x}: length {len} with {} parameter bytes, need {min_len}",
            params.len()
        )));
    }
    Ok(params)
}

fn handle_at(params: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([params[at], params[at + 1]]) & HANDLE_MASK
}

fn address_at(params: &[u8], at: usize) -> Result<Address> {
    Address::from_le_slice(&params[at..])
        .ok_or_else(|| Error::MalformedPacket("truncated device address".into()))
}

/// Connection Complete event (0x03).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionComplete {
    pub status: u8,
    pub handle: u16,
    pub address: Address,
    pub link_type: u8,
    pub encryption_enabled: bool,
}

impl ConnectionComplete {
    pub const PARAMETERS_LEN: usize = 11;

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let params = parameters(raw, event_code::CONNECTION_COMPLETE, Self::PARAMETERS_LEN)?;
        Ok(Self {
            status: params[0],
            handle: handle_at(params, 1),
            address: address_at(params, 3)?,
            link_type: params[9],
            encryption_enabled: params[10] != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut raw = vec![event_code::CONNECTION_COMPLETE, Self::PARAMETERS_LEN as u8, self.status];
        raw.extend_from_slice(&(self.handle & HANDLE_MASK).to_le_bytes());
        raw.extend_from_slice(&self.address.to_le_bytes());
        raw.push(self.link_type);
        raw.push(u8::from(self.encryption_enabled));
        raw
    }
}

/// Connection Request event (0x04).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub address: Address,
    pub class_of_device: [u8; 3],
    pub link_type: u8,
}

impl ConnectionRequest {
    pub const PARAMETERS_LEN: usize = 10;

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let params = parameters(raw, event_code::CONNECTION_REQUEST, Self::PARAMETERS_LEN)?;
        Ok(Self {
            address: address_at(params, 0)?,
            class_of_device: [params[6], params[7], params[8]],
            link_type: params[9],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut raw = vec![event_code::CONNECTION_REQUEST, Self::PARAMETERS_LEN as u8];
        raw.extend_from_slice(&self.address.to_le_bytes());
        raw.extend_from_slice(&self.class_of_device);
        raw.push(self.link_type);
        raw
    }
}

/// Role of the local device on an LE link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    Central = 0x00,
    Peripheral = 0x01,
}

/// LE Connection Complete (subevent 0x01) or LE Enhanced Connection
/// Complete (subevent 0x0a). Both share the leading fields read here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeConnectionComplete {
    pub status: u8,
    pub handle: u16,
    pub role: Role,
    pub peer_address_type: AddressType,
    pub peer_address: Address,
}

impl LeConnectionComplete {
    /// Subevent code, status, handle, role, peer address type and address.
    const LEADING_LEN: usize = 12;
    /// Full parameter length of the legacy subevent.
    pub const PARAMETERS_LEN: usize = 19;

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let params = parameters(raw, event_code::LE_META_EVENT, Self::LEADING_LEN)?;
        match params[0] {
            subevent_code::LE_CONNECTION_COMPLETE | subevent_code::LE_ENHANCED_CONNECTION_COMPLETE => {}
            other => {
                return Err(Error::MalformedPacket(format!(
                    "LE subevent {other:#04x} is not a connection complete"
                )));
            }
        }
        let role = match params[4] {
            0x00 => Role::Central,
            0x01 => Role::Peripheral,
            other => return Err(Error::MalformedPacket(format!("unknown role {other:#04x}"))),
        };
        Ok(Self {
            status: params[1],
            handle: handle_at(params, 2),
            role,
            peer_address_type: AddressType::try_from(params[5])?,
            peer_address: address_at(params, 6)?,
        })
    }

    /// Encode as the legacy subevent with zeroed connection parameters.
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = vec![
            event_code::LE_META_EVENT,
            Self::PARAMETERS_LEN as u8,
            subevent_code::LE_CONNECTION_COMPLETE,
            self.status,
        ];
        raw.extend_from_slice(&(self.handle & HANDLE_MASK).to_le_bytes());
        raw.push(self.role as u8);
        raw.push(self.peer_address_type as u8);
        raw.extend_from_slice(&self.peer_address.to_le_bytes());
        raw.resize(2 + Self::PARAMETERS_LEN, 0);
        raw
    }
}

/// Command Complete for `Read_BD_ADDR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBdAddrComplete {
    pub status: u8,
    pub address: Address,
}

impl ReadBdAddrComplete {
    pub const PARAMETERS_LEN: usize = 10;

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let params = parameters(raw, event_code::COMMAND_COMPLETE, Self::PARAMETERS_LEN)?;
        let opcode = u16::from_le_bytes([params[1], params[2]]);
        if opcode != READ_BD_ADDR_OPCODE {
            return Err(Error::MalformedPacket(format!(
                "command complete for opcode {opcode:#06x}, expected Read_BD_ADDR"
            )));
        }
        Ok(Self {
            status: params[3],
            address: address_at(params, 4)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut raw = vec![event_code::COMMAND_COMPLETE, Self::PARAMETERS_LEN as u8, 0x01];
        raw.extend_from_slice(&READ_BD_ADDR_OPCODE.to_le_bytes());
        raw.push(self.status);
        raw.extend_from_slice(&self.address.to_le_bytes());
        raw
    }
}

/// Reason codes accepted by `Disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum DisconnectReason {
    AuthenticationFailure = 0x05,
    #[default]
    RemoteUserTerminatedConnection = 0x13,
    RemoteDeviceTerminatedConnectionLowResources = 0x14,
    RemoteDeviceTerminatedConnectionPowerOff = 0x15,
    UnsupportedRemoteFeature = 0x1a,
    PairingWithUnitKeyNotSupported = 0x29,
    UnacceptableConnectionParameters = 0x3b,
}

impl DisconnectReason {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Address {
        "11:22:33:44:55:66".parse().unwrap()
    }

    #[test]
    fn connection_complete_parses_and_masks_flag_bits() {
        let mut raw = ConnectionComplete {
            status: SUCCESS,
            handle: 0x0123,
            address: peer(),
            link_type: 0x01,
            encryption_enabled: false,
        }
        .encode();
        assert_eq!(&raw[..3], &[0x03, 0x0b, 0x00]);

        raw[4] |= 0x30;
        let parsed = ConnectionComplete::parse(&raw).unwrap();
        assert_eq!(parsed.handle, 0x0123);
        assert_eq!(parsed.address, peer());
        assert!(!parsed.encryption_enabled);
    }

    #[test]
    fn truncated_event_is_malformed() {
        let raw = vec![0x03, 0x0b, 0x00, 0x01];
        assert!(matches!(ConnectionComplete::parse(&raw), Err(Error::MalformedPacket(_))));
        assert!(ConnectionComplete::parse(&[]).is_err());
    }

    #[test]
    fn wrong_event_code_is_rejected() {
        let raw = ConnectionRequest {
            address: peer(),
            class_of_device: [0x0c, 0x02, 0x5a],
            link_type: 0x01,
        }
        .encode();
        assert!(ConnectionComplete::parse(&raw).is_err());
        assert_eq!(ConnectionRequest::parse(&raw).unwrap().class_of_device, [0x0c, 0x02, 0x5a]);
    }

    #[test]
    fn le_connection_complete_accepts_enhanced_subevent() {
        let mut raw = LeConnectionComplete {
            status: SUCCESS,
            handle: 0x0040,
            role: Role::Peripheral,
            peer_address_type: AddressType::RandomDevice,
            peer_address: peer(),
        }
        .encode();
        assert_eq!(raw.len(), 2 + LeConnectionComplete::PARAMETERS_LEN);

        raw[2] = subevent_code::LE_ENHANCED_CONNECTION_COMPLETE;
        let parsed = LeConnectionComplete::parse(&raw).unwrap();
        assert_eq!(parsed.handle, 0x0040);
        assert_eq!(parsed.role, Role::Peripheral);
        assert_eq!(parsed.peer_address_type, AddressType::RandomDevice);
        assert_eq!(ConnectionEvent::new(raw).label(), "LeEnhancedConnectionComplete");
    }

    #[test]
    fn read_bd_addr_complete_checks_opcode() {
        let mut raw = ReadBdAddrComplete {
            status: SUCCESS,
            address: peer(),
        }
        .encode();
        assert_eq!(&raw[..5], &[0x0e, 0x0a, 0x01, 0x09, 0x10]);
        assert_eq!(ReadBdAddrComplete::parse(&raw).unwrap().address, peer());

        raw[3] = 0x03;
        assert!(ReadBdAddrComplete::parse(&raw).is_err());
    }

    #[test]
    fn acl_payload_search() {
        let data = AclData::new(1, b"\x29\x00\x07\x00This is just SomeMoreAclData".to_vec());
        assert!(data.payload_contains(b"SomeMoreAclData"));
        assert!(!data.payload_contains(b"SomeAclData"));
        assert!(data.payload_contains(b""));
    }

    #[test]
    fn labels_name_the_event() {
        assert_eq!(ConnectionEvent::new(vec![0x03, 0x00]).label(), "ConnectionComplete");
        assert_eq!(ConnectionEvent::new(vec![0x13, 0x00]).label(), "HciEvent(0x13)");
        assert_eq!(ConnectionEvent::new(Vec::new()).label(), "Empty");
    }
}
