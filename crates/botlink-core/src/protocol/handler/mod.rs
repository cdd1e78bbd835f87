//! Protocol handlers
//!
//! One stateless handler per protocol generation. Handlers carry no
//! connection state: every operation receives the session's channel and
//! configuration, and anything an operation needs to remember lives in
//! locals of that call.

mod v10;
mod v3;
mod v6;

pub use v10::V10Handler;
pub use v3::V3Handler;
pub use v6::V6Handler;

use std::time::Duration;

use tracing::{debug, info};

use super::commands::INTERVAL_RESPONSE_PREFIX;
use super::framing::{data_length_command, parse_interval};
use super::{
    Ack, Command, ConnectionConfig, DeviceChannel, DownloadReport, Expect, Instruction,
    ProtocolError, ProtocolVersion, RobotLink,
};

/// Handler for the negotiated protocol generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// ASCII protocol
    V3(V3Handler),
    /// Binary single-blob protocol
    V6(V6Handler),
    /// Binary chunked protocol
    V10(V10Handler),
}

impl Handler {
    /// Protocol generation this handler speaks
    pub fn version(&self) -> ProtocolVersion {
        match self {
            Handler::V3(_) => ProtocolVersion::V3,
            Handler::V6(_) => ProtocolVersion::V6,
            Handler::V10(_) => ProtocolVersion::V10,
        }
    }

    /// Put the robot into real-time drive mode
    pub async fn start_drive_mode<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
    ) -> Result<(), ProtocolError> {
        match self {
            Handler::V3(h) => h.start_drive_mode(channel, config).await,
            Handler::V6(h) => h.start_drive_mode(channel, config).await,
            Handler::V10(h) => h.start_drive_mode(channel, config).await,
        }
    }

    /// Record a manual driving session of `duration_seconds`
    pub async fn record_instructions<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
        duration_seconds: u32,
        sample_interval: u32,
    ) -> Result<(), ProtocolError> {
        match self {
            Handler::V3(h) => {
                h.record_instructions(channel, config, duration_seconds, sample_interval)
                    .await
            }
            Handler::V6(h) => {
                h.record_instructions(channel, config, duration_seconds, sample_interval)
                    .await
            }
            Handler::V10(h) => {
                h.record_instructions(channel, config, duration_seconds, sample_interval)
                    .await
            }
        }
    }

    /// Run the program stored on the robot until it finishes
    pub async fn run_stored_instructions<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
    ) -> Result<(), ProtocolError> {
        run(channel, config).await
    }

    /// Stop the robot
    pub async fn stop<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
    ) -> Result<(), ProtocolError> {
        stop(channel, config).await
    }

    /// Replace the stored program, optionally running it afterwards
    pub async fn upload_instructions<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
        instructions: &[Instruction],
        run_after_upload: bool,
    ) -> Result<(), ProtocolError> {
        check_instruction_count(self.version(), instructions.len())?;
        match self {
            Handler::V3(h) => {
                h.upload_instructions(channel, config, instructions, run_after_upload)
                    .await
            }
            Handler::V6(h) => {
                h.upload_instructions(channel, config, instructions, run_after_upload)
                    .await
            }
            Handler::V10(h) => {
                h.upload_instructions(channel, config, instructions, run_after_upload)
                    .await
            }
        }
    }

    /// Read back the stored program
    pub async fn download_instructions<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
    ) -> Result<DownloadReport, ProtocolError> {
        match self {
            Handler::V3(h) => h.download_instructions(channel, config).await,
            Handler::V6(h) => h.download_instructions(channel, config).await,
            Handler::V10(h) => h.download_instructions(channel, config).await,
        }
    }

    /// Query the sampling interval
    pub async fn get_interval<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
    ) -> Result<u32, ProtocolError> {
        get_interval(channel, config).await
    }

    /// Set the sampling interval; returns the value the robot confirmed
    pub async fn set_interval<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
        value: u32,
    ) -> Result<u32, ProtocolError> {
        set_interval(channel, config, value).await
    }
}

/// Reject empty programs and programs the firmware cannot store
pub(crate) fn check_instruction_count(
    version: ProtocolVersion,
    count: usize,
) -> Result<(), ProtocolError> {
    let max = version.max_instructions();
    if count == 0 || count > max {
        return Err(ProtocolError::InvalidInstructionCount { count, max });
    }
    Ok(())
}

async fn drive_mode<L: RobotLink>(
    channel: &DeviceChannel<L>,
    config: &ConnectionConfig,
    ack: Ack,
) -> Result<(), ProtocolError> {
    channel
        .request_command(
            Command::DriveMode,
            Expect::Literal(ack.as_str()),
            config.response_timeout(),
        )
        .await?;
    info!("Drive mode active");
    Ok(())
}

async fn run<L: RobotLink>(
    channel: &DeviceChannel<L>,
    config: &ConnectionConfig,
) -> Result<(), ProtocolError> {
    info!("Running stored program");
    channel
        .request_command(
            Command::Run,
            Expect::Literal(Ack::End.as_str()),
            config.run_timeout(),
        )
        .await?;
    info!("Stored program finished");
    Ok(())
}

async fn stop<L: RobotLink>(
    channel: &DeviceChannel<L>,
    config: &ConnectionConfig,
) -> Result<(), ProtocolError> {
    channel
        .request_command(
            Command::Stop,
            Expect::Literal(Ack::Stopped.as_str()),
            config.response_timeout(),
        )
        .await?;
    Ok(())
}

fn interval_from_reply(reply: &str) -> Result<u32, ProtocolError> {
    parse_interval(reply).ok_or_else(|| {
        ProtocolError::unexpected(format!("{}<n>", INTERVAL_RESPONSE_PREFIX), reply)
    })
}

async fn get_interval<L: RobotLink>(
    channel: &DeviceChannel<L>,
    config: &ConnectionConfig,
) -> Result<u32, ProtocolError> {
    let reply = channel
        .request_command(
            Command::QueryInterval,
            Expect::Prefix(INTERVAL_RESPONSE_PREFIX),
            config.response_timeout(),
        )
        .await?;
    let interval = interval_from_reply(&reply)?;
    debug!("Interval is {}", interval);
    Ok(interval)
}

async fn set_interval<L: RobotLink>(
    channel: &DeviceChannel<L>,
    config: &ConnectionConfig,
    value: u32,
) -> Result<u32, ProtocolError> {
    if value == 0 {
        return Err(ProtocolError::InvalidArgument(
            "interval must be at least 1".to_string(),
        ));
    }
    let reply = channel
        .request_command(
            Command::SetInterval(value),
            Expect::Prefix(INTERVAL_RESPONSE_PREFIX),
            config.response_timeout(),
        )
        .await?;
    let confirmed = interval_from_reply(&reply)?;
    if confirmed != value {
        return Err(ProtocolError::unexpected(
            format!("{}{}", INTERVAL_RESPONSE_PREFIX, value),
            reply,
        ));
    }
    info!("Interval set to {}", confirmed);
    Ok(confirmed)
}

/// Flush memory, announce `pairs` samples and record for `duration_seconds`
async fn record<L: RobotLink>(
    channel: &DeviceChannel<L>,
    config: &ConnectionConfig,
    pairs: u64,
    duration_seconds: u32,
) -> Result<(), ProtocolError> {
    if duration_seconds == 0 {
        return Err(ProtocolError::InvalidArgument(
            "recording duration must be at least one second".to_string(),
        ));
    }
    let length = data_length_command(pairs)?;

    info!("Recording for {}s ({} samples)", duration_seconds, pairs);
    channel.send_command(Command::Flush).await?;
    channel.send_command(length).await?;
    channel
        .request_command(
            Command::Record,
            Expect::Literal(Ack::Full.as_str()),
            config.record_timeout(duration_seconds),
        )
        .await?;
    info!("Recording complete");
    Ok(())
}

/// Announce an upload of `count` instructions: `F`, `d<hex>`, `E`
async fn begin_upload<L: RobotLink>(
    channel: &DeviceChannel<L>,
    count: usize,
) -> Result<(), ProtocolError> {
    let length = data_length_command(count as u64)?;
    channel.send_command(Command::Flush).await?;
    channel.send_command(length).await?;
    channel.send_command(Command::EnterUpload).await
}

/// Terminate an upload with `end`, wait for `FULL`, optionally run
async fn finish_upload<L: RobotLink>(
    channel: &DeviceChannel<L>,
    config: &ConnectionConfig,
    run_after_upload: bool,
) -> Result<(), ProtocolError> {
    channel
        .request_command(
            Command::EndUpload,
            Expect::Literal(Ack::Full.as_str()),
            config.upload_timeout(),
        )
        .await?;
    info!("Upload acknowledged");
    if run_after_upload {
        run(channel, config).await?;
    }
    Ok(())
}

fn packet_timeout(config: &ConnectionConfig) -> Duration {
    config.download_packet_timeout()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_count_limits() {
        assert!(check_instruction_count(ProtocolVersion::V3, 100).is_ok());
        assert_eq!(
            check_instruction_count(ProtocolVersion::V3, 101),
            Err(ProtocolError::InvalidInstructionCount {
                count: 101,
                max: 100
            })
        );
        assert!(check_instruction_count(ProtocolVersion::V10, 4096).is_ok());
        assert!(check_instruction_count(ProtocolVersion::V6, 0).is_err());
    }

    #[test]
    fn test_interval_reply() {
        assert_eq!(interval_from_reply("I=7"), Ok(7));
        assert!(matches!(
            interval_from_reply("I=?"),
            Err(ProtocolError::UnexpectedResponse { .. })
        ));
    }
}
