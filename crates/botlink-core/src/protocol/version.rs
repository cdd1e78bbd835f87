//! Protocol version resolution
//!
//! Maps the firmware version reported during the handshake to the wire
//! protocol generation it speaks.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::handler::{Handler, V10Handler, V3Handler, V6Handler};
use super::ProtocolError;

/// Wire protocol generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// ASCII protocol of firmware 2-4
    V3,
    /// Binary single-blob protocol of firmware 9
    V6,
    /// Binary chunked protocol of firmware 10 and later
    V10,
}

impl ProtocolVersion {
    /// Largest program the firmware can store
    pub fn max_instructions(&self) -> usize {
        match self {
            ProtocolVersion::V3 => 100,
            ProtocolVersion::V6 => 2400,
            ProtocolVersion::V10 => 4096,
        }
    }

    /// True for the binary protocols with packeted download
    pub fn is_binary(&self) -> bool {
        !matches!(self, ProtocolVersion::V3)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolVersion::V3 => "V3",
            ProtocolVersion::V6 => "V6",
            ProtocolVersion::V10 => "V10",
        };
        f.write_str(name)
    }
}

/// Resolve a firmware version to its protocol generation
pub fn resolve(firmware_version: u32) -> Result<ProtocolVersion, ProtocolError> {
    match firmware_version {
        2..=4 => Ok(ProtocolVersion::V3),
        9 => Ok(ProtocolVersion::V6),
        v if v >= 10 => Ok(ProtocolVersion::V10),
        other => Err(ProtocolError::UnsupportedFirmwareVersion(other)),
    }
}

/// Create a fresh handler for a protocol generation
pub fn create_handler(version: ProtocolVersion) -> Handler {
    match version {
        ProtocolVersion::V3 => Handler::V3(V3Handler),
        ProtocolVersion::V6 => Handler::V6(V6Handler),
        ProtocolVersion::V10 => Handler::V10(V10Handler),
    }
}
