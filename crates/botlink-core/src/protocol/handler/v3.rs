//! V3 text protocol (firmware 2-4)
//!
//! Every instruction travels as its own ASCII line and downloads come back
//! as text lines terminated by `,,,,`.

use tracing::{debug, info};

use super::{begin_upload, drive_mode, finish_upload, packet_timeout, record};
use crate::protocol::framing::{latin1_decode, parse_v3_pairs, v3_instruction_line};
use crate::protocol::{
    Ack, Command, ConnectionConfig, DeviceChannel, DownloadReport, Instruction, ProtocolError,
    RobotLink,
};

/// Handler for the V3 text protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct V3Handler;

impl V3Handler {
    /// `G`, acknowledged with `_GO_`
    pub async fn start_drive_mode<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
    ) -> Result<(), ProtocolError> {
        drive_mode(channel, config, Ack::DriveGo).await
    }

    /// The firmware samples once per second; `_sample_interval` is ignored
    pub async fn record_instructions<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
        duration_seconds: u32,
        _sample_interval: u32,
    ) -> Result<(), ProtocolError> {
        record(channel, config, u64::from(duration_seconds), duration_seconds).await
    }

    /// `F`, `d<hex>`, `E`, one `lll,rrrxx` line per instruction, `end`
    pub async fn upload_instructions<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
        instructions: &[Instruction],
        run_after_upload: bool,
    ) -> Result<(), ProtocolError> {
        info!("Uploading {} instructions as text lines", instructions.len());
        begin_upload(channel, instructions.len()).await?;
        for instruction in instructions {
            channel.send_text(&v3_instruction_line(instruction)).await?;
        }
        finish_upload(channel, config, run_after_upload).await
    }

    /// `B`, then text lines of `ddd,ddd` pairs until `,,,,`
    pub async fn download_instructions<L: RobotLink>(
        &self,
        channel: &DeviceChannel<L>,
        config: &ConnectionConfig,
    ) -> Result<DownloadReport, ProtocolError> {
        let terminator = Ack::DownloadEnd.as_str();
        channel.send_command(Command::BeginDownload).await?;
        let lines = channel
            .collect_responses(
                |lines| {
                    lines
                        .last()
                        .is_some_and(|line| latin1_decode(line).contains(terminator))
                },
                packet_timeout(config),
            )
            .await?;

        let instructions: Vec<Instruction> = lines
            .iter()
            .flat_map(|line| parse_v3_pairs(&latin1_decode(line)))
            .collect();
        debug!(
            "Downloaded {} instructions in {} lines",
            instructions.len(),
            lines.len()
        );

        Ok(DownloadReport {
            instructions,
            ..DownloadReport::default()
        })
    }
}
