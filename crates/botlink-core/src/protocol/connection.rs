//! Connection management
//!
//! Handles the session lifecycle: version handshake, protocol selection and
//! forwarding of the high-level operations to the negotiated handler.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::channel::ChannelCounters;
use super::framing::{parse_version, version_pattern};
use super::{
    create_handler, resolve, Command, DeviceChannel, DownloadReport, Expect, Handler,
    Instruction, ProtocolError, ProtocolVersion, RobotLink, DEFAULT_TIMEOUT_MS, MAX_INBOX_LEN,
    RECORD_MARGIN_MS, RUN_TIMEOUT_MS,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Version handshake in progress
    Handshaking,
    /// Connected and idle
    Ready,
    /// An operation is in flight
    Executing,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Timeout for simple command acknowledgements
    pub response_timeout_ms: u64,
    /// Added to the requested duration while waiting for a recording
    pub record_margin_ms: u64,
    /// Upper bound for a stored program to finish running
    pub run_timeout_ms: u64,
    /// Timeout for `FULL` after an upload
    pub upload_timeout_ms: u64,
    /// Timeout for each payload of a download
    pub download_packet_timeout_ms: u64,
    /// Unclaimed inbound payloads kept by the channel
    pub inbox_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: DEFAULT_TIMEOUT_MS,
            record_margin_ms: RECORD_MARGIN_MS,
            run_timeout_ms: RUN_TIMEOUT_MS,
            upload_timeout_ms: 2 * DEFAULT_TIMEOUT_MS,
            download_packet_timeout_ms: DEFAULT_TIMEOUT_MS,
            inbox_capacity: MAX_INBOX_LEN,
        }
    }
}

impl ConnectionConfig {
    /// Parse a configuration from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Timeout for simple command acknowledgements
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Timeout for a recording of `duration_seconds`
    pub fn record_timeout(&self, duration_seconds: u32) -> Duration {
        Duration::from_secs(u64::from(duration_seconds))
            + Duration::from_millis(self.record_margin_ms)
    }

    /// Timeout for a stored program run
    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    /// Timeout for the upload acknowledgement
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    /// Timeout for each download payload
    pub fn download_packet_timeout(&self) -> Duration {
        Duration::from_millis(self.download_packet_timeout_ms)
    }
}

/// Metadata of a connected robot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotInfo {
    /// Link identifier
    pub id: String,
    /// Advertised device name
    pub name: String,
    /// Firmware version reported by the handshake
    pub firmware_version: u32,
    /// Negotiated protocol generation
    pub protocol_version: ProtocolVersion,
    /// Current sampling interval
    pub interval: u32,
    /// When the handshake completed
    pub connected_at: DateTime<Utc>,
}

/// Resets the session to `Ready` when an operation ends
struct OperationGuard<'a, L: RobotLink> {
    session: &'a RobotSession<L>,
}

impl<L: RobotLink> Drop for OperationGuard<'_, L> {
    fn drop(&mut self) {
        let closed = self.session.channel.is_closed();
        let mut state = self.session.lock_state();
        if *state == ConnectionState::Executing {
            *state = if closed {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Ready
            };
        }
    }
}

/// A connected robot speaking one negotiated protocol
pub struct RobotSession<L: RobotLink> {
    link: Arc<L>,
    channel: DeviceChannel<L>,
    handler: Handler,
    config: ConnectionConfig,
    info: RobotInfo,
    interval: AtomicU32,
    state: Mutex<ConnectionState>,
}

impl<L: RobotLink> RobotSession<L> {
    /// Connect over `link`: handshake, pick the protocol, read the interval
    pub async fn connect(link: Arc<L>, config: ConnectionConfig) -> Result<Self, ProtocolError> {
        info!("Connecting to {} ({})", link.name(), link.id());
        let channel = DeviceChannel::with_inbox_capacity(link.clone(), config.inbox_capacity);

        debug!("State: {:?}", ConnectionState::Handshaking);
        let (firmware_version, handler) = match handshake(&channel, &config).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Handshake with {} failed: {}", link.id(), e);
                return Err(e);
            }
        };
        let protocol_version = handler.version();
        let interval = handler.get_interval(&channel, &config).await?;

        info!(
            "Connected to {}: firmware {}, protocol {}, interval {}",
            link.name(),
            firmware_version,
            protocol_version,
            interval
        );

        let info = RobotInfo {
            id: link.id().to_string(),
            name: link.name().to_string(),
            firmware_version,
            protocol_version,
            interval,
            connected_at: Utc::now(),
        };

        Ok(Self {
            link,
            channel,
            handler,
            config,
            info,
            interval: AtomicU32::new(interval),
            state: Mutex::new(ConnectionState::Ready),
        })
    }

    /// Dispose the channel and close the link.
    ///
    /// An operation still in flight fails with [`ProtocolError::ConnectionClosed`].
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        *self.lock_state() = ConnectionState::Disconnected;
        self.channel.dispose();
        info!("Disconnecting from {}", self.info.id);
        self.link.disconnect().await
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        if self.channel.is_closed() {
            return ConnectionState::Disconnected;
        }
        *self.lock_state()
    }

    /// Snapshot of the session metadata
    pub fn info(&self) -> RobotInfo {
        RobotInfo {
            interval: self.interval(),
            ..self.info.clone()
        }
    }

    /// Link identifier
    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// Advertised device name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Firmware version reported by the handshake
    pub fn firmware_version(&self) -> u32 {
        self.info.firmware_version
    }

    /// Negotiated protocol generation
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.info.protocol_version
    }

    /// Last known sampling interval
    pub fn interval(&self) -> u32 {
        self.interval.load(Ordering::SeqCst)
    }

    /// Active configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Cumulative traffic counters
    pub fn counters(&self) -> ChannelCounters {
        self.channel.counters()
    }

    /// Put the robot into real-time drive mode
    pub async fn start_drive_mode(&self) -> Result<(), ProtocolError> {
        let _op = self.begin()?;
        self.handler
            .start_drive_mode(&self.channel, &self.config)
            .await
    }

    /// Record a manual driving session
    pub async fn record_instructions(
        &self,
        duration_seconds: u32,
        sample_interval: u32,
    ) -> Result<(), ProtocolError> {
        let _op = self.begin()?;
        self.handler
            .record_instructions(&self.channel, &self.config, duration_seconds, sample_interval)
            .await
    }

    /// Run the stored program until it finishes
    pub async fn run_stored_instructions(&self) -> Result<(), ProtocolError> {
        let _op = self.begin()?;
        self.handler
            .run_stored_instructions(&self.channel, &self.config)
            .await
    }

    /// Stop the robot
    pub async fn stop(&self) -> Result<(), ProtocolError> {
        let _op = self.begin()?;
        self.handler.stop(&self.channel, &self.config).await
    }

    /// Replace the stored program, optionally running it afterwards
    pub async fn upload_instructions(
        &self,
        instructions: &[Instruction],
        run_after_upload: bool,
    ) -> Result<(), ProtocolError> {
        let _op = self.begin()?;
        self.handler
            .upload_instructions(&self.channel, &self.config, instructions, run_after_upload)
            .await
    }

    /// Read back the stored program
    pub async fn download_instructions(&self) -> Result<DownloadReport, ProtocolError> {
        let _op = self.begin()?;
        self.handler
            .download_instructions(&self.channel, &self.config)
            .await
    }

    /// Query the sampling interval from the robot
    pub async fn get_interval(&self) -> Result<u32, ProtocolError> {
        let _op = self.begin()?;
        let interval = self
            .handler
            .get_interval(&self.channel, &self.config)
            .await?;
        self.interval.store(interval, Ordering::SeqCst);
        Ok(interval)
    }

    /// Set the sampling interval
    pub async fn set_interval(&self, value: u32) -> Result<u32, ProtocolError> {
        let _op = self.begin()?;
        let interval = self
            .handler
            .set_interval(&self.channel, &self.config, value)
            .await?;
        self.interval.store(interval, Ordering::SeqCst);
        Ok(interval)
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the session for one operation
    fn begin(&self) -> Result<OperationGuard<'_, L>, ProtocolError> {
        let closed = self.channel.is_closed();
        let mut state = self.lock_state();
        if closed {
            *state = ConnectionState::Disconnected;
        }
        match *state {
            ConnectionState::Ready => {
                *state = ConnectionState::Executing;
                Ok(OperationGuard { session: self })
            }
            ConnectionState::Executing | ConnectionState::Handshaking => {
                Err(ProtocolError::ChannelBusy)
            }
            ConnectionState::Disconnected => Err(ProtocolError::NotConnected),
        }
    }
}

/// Query the firmware version and pick the handler for it
async fn handshake<L: RobotLink>(
    channel: &DeviceChannel<L>,
    config: &ConnectionConfig,
) -> Result<(u32, Handler), ProtocolError> {
    let reply = match channel
        .request_command(
            Command::QueryVersion,
            Expect::Pattern(version_pattern()),
            config.response_timeout(),
        )
        .await
    {
        Ok(reply) => reply,
        Err(ProtocolError::UnexpectedResponse { actual, .. }) => {
            return Err(ProtocolError::InvalidVersionResponse(actual))
        }
        Err(e) => return Err(e),
    };
    let firmware_version =
        parse_version(&reply).ok_or_else(|| ProtocolError::InvalidVersionResponse(reply.clone()))?;
    let protocol_version = resolve(firmware_version)?;
    debug!(
        "handshake: firmware {} -> protocol {}",
        firmware_version, protocol_version
    );
    Ok((firmware_version, create_handler(protocol_version)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.response_timeout(), Duration::from_secs(5));
        assert_eq!(config.record_timeout(3), Duration::from_secs(13));
        assert_eq!(config.inbox_capacity, MAX_INBOX_LEN);
    }

    #[test]
    fn test_connection_config_partial_json() {
        let config = ConnectionConfig::from_json(r#"{"run_timeout_ms": 60000}"#).unwrap();
        assert_eq!(config.run_timeout(), Duration::from_secs(60));
        assert_eq!(config.response_timeout_ms, DEFAULT_TIMEOUT_MS);

        let json = config.to_json().unwrap();
        assert_eq!(ConnectionConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_connection_state() {
        let state = ConnectionState::Disconnected;
        assert_eq!(state, ConnectionState::Disconnected);
        assert_ne!(state, ConnectionState::Ready);
    }
}
