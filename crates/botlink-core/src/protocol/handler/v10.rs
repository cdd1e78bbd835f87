//! V10 binary protocol (firmware 10 and later)
//!
//! Same control surface and download as V6; uploads are split into
//! 256-instruction writes so large programs fit the link's buffers.

use super::v6::{download_packets, record_sampled, upload_binary};
use super::drive_mode;
use crate::protocol::{
    Ack, ConnectionConfig, DeviceChannel, DownloadReport, Instruction, ProtocolError,
    RobotLink, UPLOAD_CHUNK_SIZE,
};

/// Handler for the V10 binary protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct V10Handler;

impl V10Handler {
    /// `G`, acknowledged with `_GR_`
    pub async fn start_drive_mode<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
    ) -> Result<(), ProtocolError> {
        drive_mode(channel, config, Ack::DriveReady).await
    }

    /// Announces `sample_interval * duration_seconds` samples
    pub async fn record_instructions<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
        duration_seconds: u32,
        sample_interval: u32,
    ) -> Result<(), ProtocolError> {
        record_sampled(channel, config, duration_seconds, sample_interval).await
    }

    /// `F`, `d<hex>`, `E`, one binary write per 256 instructions, `end`
    pub async fn upload_instructions<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
        instructions: &[Instruction],
        run_after_upload: bool,
    ) -> Result<(), ProtocolError> {
        upload_binary(
            channel,
            config,
            instructions,
            UPLOAD_CHUNK_SIZE,
            run_after_upload,
        )
        .await
    }

    /// Packeted, sequence-numbered download
    pub async fn download_instructions<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
    ) -> Result<DownloadReport, ProtocolError> {
        download_packets(channel, config).await
    }
}
