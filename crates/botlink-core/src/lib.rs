//! # BotLink Core Library
//!
//! Protocol layer for commanding two-motor educational robots over a
//! Bluetooth Low Energy link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Firmware version handshake and protocol selection (V3, V6, V10)
//! - Motor speed encoding between the 0-100 and 0-255 domains
//! - Text and binary instruction upload, including chunked transfers
//! - Sequence-tracked packeted download with lost-packet reporting
//! - A simulated robot for demo mode and tests
//!
//! The BLE stack itself is not part of this crate. Applications adapt their
//! BLE characteristic to the [`protocol::RobotLink`] trait.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use botlink_core::protocol::{ConnectionConfig, Instruction, RobotSession};
//!
//! let session = RobotSession::connect(Arc::new(link), ConnectionConfig::default()).await?;
//! println!("firmware {} speaks {}", session.firmware_version(), session.protocol_version());
//!
//! session
//!     .upload_instructions(&[Instruction::new(50, 50), Instruction::new(80, 20)], true)
//!     .await?;
//! session.disconnect().await?;
//! ```

pub mod demo;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::demo::MockRobot;
    pub use crate::protocol::{
        ConnectionConfig, ConnectionState, DownloadReport, Instruction, ProtocolError,
        ProtocolVersion, RobotInfo, RobotLink, RobotSession,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
