//! Protocol commands
//!
//! Defines the commands and acknowledgements shared by every firmware
//! generation. Commands are short case-sensitive ASCII tokens.

use serde::{Deserialize, Serialize};

use super::framing::latin1_encode;

/// Commands understood by the robot firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Clear program memory ('F')
    Flush,

    /// Enter upload mode ('E')
    EnterUpload,

    /// Begin download of the stored program ('B')
    BeginDownload,

    /// Enter real-time drive mode ('G')
    DriveMode,

    /// Run the stored program ('R')
    Run,

    /// Stop whatever the robot is doing ('S')
    Stop,

    /// Begin recording a manual driving session ('L')
    Record,

    /// Query the sampling interval ('I?')
    QueryInterval,

    /// Set the sampling interval ('I<n>')
    SetInterval(u32),

    /// Query the firmware version ('Z')
    QueryVersion,

    /// Announce the length of the data that follows ('d' + 4 hex digits)
    DataLength(u16),

    /// Terminate an upload ('end')
    EndUpload,
}

impl Command {
    /// Text form of the command as written to the link
    pub fn text(&self) -> String {
        match self {
            Command::Flush => "F".to_string(),
            Command::EnterUpload => "E".to_string(),
            Command::BeginDownload => "B".to_string(),
            Command::DriveMode => "G".to_string(),
            Command::Run => "R".to_string(),
            Command::Stop => "S".to_string(),
            Command::Record => "L".to_string(),
            Command::QueryInterval => "I?".to_string(),
            Command::SetInterval(value) => format!("I{}", value),
            Command::QueryVersion => "Z".to_string(),
            Command::DataLength(value) => format!("d{:04X}", value),
            Command::EndUpload => "end".to_string(),
        }
    }

    /// Latin-1 bytes of the command
    pub fn to_bytes(&self) -> Vec<u8> {
        latin1_encode(&self.text())
    }
}

/// Acknowledgement literals sent back by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ack {
    /// Upload or recording complete
    Full,
    /// Stored program finished running
    End,
    /// Robot stopped
    Stopped,
    /// Drive mode acknowledged (V6/V10)
    DriveReady,
    /// Drive mode acknowledged (V3)
    DriveGo,
    /// End of a V3 text download
    DownloadEnd,
}

impl Ack {
    /// The literal text of the acknowledgement
    pub fn as_str(&self) -> &'static str {
        match self {
            Ack::Full => "FULL",
            Ack::End => "_END",
            Ack::Stopped => "_SR_",
            Ack::DriveReady => "_GR_",
            Ack::DriveGo => "_GO_",
            Ack::DownloadEnd => ",,,,",
        }
    }
}

/// Prefix of the interval response (`I=<n>`)
pub const INTERVAL_RESPONSE_PREFIX: &str = "I=";

/// Prefix of the version response (`VER <n>`)
pub const VERSION_RESPONSE_PREFIX: &str = "VER ";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_text() {
        assert_eq!(Command::Flush.text(), "F");
        assert_eq!(Command::QueryInterval.text(), "I?");
        assert_eq!(Command::SetInterval(5).text(), "I5");
        assert_eq!(Command::EndUpload.text(), "end");
    }

    #[test]
    fn test_data_length_is_uppercase_padded_hex() {
        assert_eq!(Command::DataLength(0x00FF).text(), "d00FF");
        assert_eq!(Command::DataLength(1).text(), "d0001");
        assert_eq!(Command::DataLength(599).text(), "d0257");
    }

    #[test]
    fn test_ack_literals() {
        assert_eq!(Ack::Full.as_str(), "FULL");
        assert_eq!(Ack::DownloadEnd.as_str(), ",,,,");
    }
}
