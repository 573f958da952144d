use std::fmt;

use crate::{
    Capture,
    hci::{ConnectionEvent, HciCaptures},
};

/// Which ACL manager a facade drives.
///
/// The two transports differ in how the controller reports an
/// established link: classic BR/EDR sends Connection Complete, LE sends an
/// LE (Enhanced) Connection Complete meta event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Transport {
    #[default]
    Classic,
    Le,
}

impl Transport {
    /// Capture of this transport's connection-complete event, yielding the
    /// connection handle.
    pub fn connection_complete(&self) -> Capture<ConnectionEvent, u16> {
        match self {
            Transport::Classic => HciCaptures::connection_complete().map(|complete| complete.handle),
            Transport::Le => HciCaptures::le_connection_complete().map(|complete| complete.handle),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Classic => write!(f, "Classic"),
            Transport::Le => write!(f, "LE"),
        }
    }
}
