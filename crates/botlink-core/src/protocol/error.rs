//! Protocol errors

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// No response arrived within the deadline
    #[error("Timed out waiting for robot response")]
    Timeout,

    /// The robot answered with something other than the expected acknowledgement
    #[error("Unexpected response: expected '{expected}', got '{actual}'")]
    UnexpectedResponse {
        /// Literal or pattern the command expects
        expected: String,
        /// Latin-1 decoded payload that actually arrived
        actual: String,
    },

    /// The handshake reported a firmware version no protocol handles
    #[error("Unsupported firmware version: {0}")]
    UnsupportedFirmwareVersion(u32),

    /// The version reply did not have the form `VER <n>`
    #[error("Invalid version response: '{0}'")]
    InvalidVersionResponse(String),

    /// The link dropped or the channel was disposed mid-operation
    #[error("Connection closed")]
    ConnectionClosed,

    /// Another operation is already waiting for a response on this channel
    #[error("Channel busy: another request is in flight")]
    ChannelBusy,

    /// Operation issued on a session that is not connected
    #[error("Not connected to robot")]
    NotConnected,

    /// Instruction list empty or larger than the protocol allows
    #[error("Invalid instruction count {count} (maximum {max})")]
    InvalidInstructionCount {
        /// Number of instructions supplied
        count: usize,
        /// Protocol maximum
        max: usize,
    },

    /// Argument outside the range the firmware accepts
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Error reported by the underlying BLE link
    #[error("Link error: {0}")]
    LinkError(String),
}

impl ProtocolError {
    /// Build an [`ProtocolError::UnexpectedResponse`] from anything string-like
    pub fn unexpected(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
