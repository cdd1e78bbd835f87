//! Robot Communication Protocol
//!
//! Implements the command/acknowledgement protocols spoken by the robot
//! firmware over its BLE serial characteristic.
//!
//! Three incompatible wire formats exist: the ASCII V3 protocol used by
//! firmware 2-4, and the binary V6/V10 protocols used by firmware 9 and 10+.

mod channel;
pub mod commands;
mod connection;
mod error;
pub mod framing;
pub mod handler;
mod instruction;
mod link;
pub mod packet;
pub mod speed;
mod version;

pub use channel::{ChannelCounters, DeviceChannel, Expect};
pub use commands::{Ack, Command};
pub use connection::{ConnectionConfig, ConnectionState, RobotInfo, RobotSession};
pub use error::ProtocolError;
pub use handler::Handler;
pub use instruction::Instruction;
pub use link::{DataCallback, DisconnectCallback, RobotLink, Subscription};
pub use packet::{DownloadReassembly, DownloadReport};
pub use speed::{decode_speed, encode_speed};
pub use version::{create_handler, resolve, ProtocolVersion};

/// Default timeout for simple command responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Margin added to the requested duration when waiting for a recording to finish
pub const RECORD_MARGIN_MS: u64 = 10_000;

/// Default upper bound for running a stored program
pub const RUN_TIMEOUT_MS: u64 = 120_000;

/// Number of instructions per V10 upload chunk
pub const UPLOAD_CHUNK_SIZE: usize = 256;

/// Maximum number of unclaimed inbound payloads kept by a channel
pub const MAX_INBOX_LEN: usize = 1024;
