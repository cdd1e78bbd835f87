//! V6 binary protocol (firmware 9)

use tracing::info;

use super::{begin_upload, drive_mode, finish_upload, packet_timeout, record};
use crate::protocol::framing::upload_chunks;
use crate::protocol::{
    Ack, Command, ConnectionConfig, DeviceChannel, DownloadReassembly, DownloadReport,
    Instruction, ProtocolError, RobotLink,
};

/// Handler for the V6 binary protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct V6Handler;

impl V6Handler {
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

    /// `F`, `d<hex>`, `E`, the whole program as one binary write, `end`
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
            instructions.len(),
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

pub(super) async fn record_sampled<L: RobotLink>(
    channel: &DeviceChannel<L>,
    config: &ConnectionConfig,
    duration_seconds: u32,
    sample_interval: u32,
) -> Result<(), ProtocolError> {
    if sample_interval == 0 {
        return Err(ProtocolError::InvalidArgument(
            "sample interval must be at least 1".to_string(),
        ));
    }
    let pairs = u64::from(sample_interval) * u64::from(duration_seconds);
    record(channel, config, pairs, duration_seconds).await
}

/// Binary upload in writes of at most `chunk_size` instructions
pub(super) async fn upload_binary<L: RobotLink>(
    channel: &DeviceChannel<L>,
    config: &ConnectionConfig,
    instructions: &[Instruction],
    chunk_size: usize,
    run_after_upload: bool,
) -> Result<(), ProtocolError> {
    info!(
        "Uploading {} instructions in chunks of {}",
        instructions.len(),
        chunk_size
    );
    begin_upload(channel, instructions.len()).await?;
    for chunk in upload_chunks(instructions, chunk_size) {
        channel.send(&chunk).await?;
    }
    finish_upload(channel, config, run_after_upload).await
}

/// `B`, header with the byte count, then sequence-numbered data payloads
pub(super) async fn download_packets<L: RobotLink>(
    channel: &DeviceChannel<L>,
    config: &ConnectionConfig,
) -> Result<DownloadReport, ProtocolError> {
    let timeout = packet_timeout(config);
    let header = channel
        .request(&Command::BeginDownload.to_bytes(), timeout)
        .await?;
    let mut reassembly = DownloadReassembly::from_header(&header)?;

    channel
        .collect_responses(
            |packets| {
                if let Some(packet) = packets.last() {
                    reassembly.accept(packet);
                }
                reassembly.is_done()
            },
            timeout,
        )
        .await?;

    let report = reassembly.finish();
    info!(
        "Downloaded {} instructions ({} lost payloads, {} bytes missing)",
        report.instructions.len(),
        report.lost_packets.len(),
        report.missing_bytes
    );
    Ok(report)
}
