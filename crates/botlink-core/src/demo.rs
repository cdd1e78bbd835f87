//! Demo Mode - Simulated robot for testing without hardware
//!
//! [`MockRobot`] implements [`RobotLink`] and answers like real firmware of
//! the chosen version: handshake, interval, drive/run/stop acknowledgements,
//! recording, text and binary uploads, text and packeted downloads.
//!
//! Every write is recorded so tests can assert the exact wire traffic.
//! Download payloads can be dropped by sequence number or at random to
//! exercise lost-packet reporting.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use byteorder::{BigEndian, ByteOrder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::protocol::framing::{decode_pairs, instruction_bytes, latin1_decode, latin1_encode};
use crate::protocol::packet::{expected_packets, payload_len};
use crate::protocol::{
    resolve, Ack, DataCallback, DisconnectCallback, Instruction, ProtocolError, ProtocolVersion,
    RobotLink, Subscription,
};

type SharedData = Arc<dyn Fn(&[u8]) + Send + Sync>;
type SharedDisconnect = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    data: BTreeMap<u64, SharedData>,
    disconnect: BTreeMap<u64, SharedDisconnect>,
}

struct RobotState {
    firmware_version: u32,
    interval: u32,
    responding: bool,
    connected: bool,
    uploading: bool,
    upload_buffer: Vec<u8>,
    announced_length: Option<u16>,
    /// Stored program as wire bytes
    memory: Vec<u8>,
    written: Vec<Vec<u8>>,
    dropped_sequences: Vec<u8>,
    packet_loss: Option<(f64, StdRng)>,
    version_reply: Option<String>,
    write_failure: Option<String>,
}

impl RobotState {
    fn protocol(&self) -> Option<ProtocolVersion> {
        resolve(self.firmware_version).ok()
    }

    fn handle(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        if self.uploading {
            return self.handle_upload(data);
        }

        let text = latin1_decode(data);
        match text.as_str() {
            "Z" => {
                let reply = self
                    .version_reply
                    .clone()
                    .unwrap_or_else(|| format!("VER {}", self.firmware_version));
                vec![latin1_encode(&reply)]
            }
            "F" => {
                self.memory.clear();
                Vec::new()
            }
            "E" => {
                self.uploading = true;
                self.upload_buffer.clear();
                Vec::new()
            }
            "G" => {
                let ack = match self.protocol() {
                    Some(ProtocolVersion::V3) => Ack::DriveGo,
                    _ => Ack::DriveReady,
                };
                vec![ack.as_str().as_bytes().to_vec()]
            }
            "R" => vec![Ack::End.as_str().as_bytes().to_vec()],
            "S" => vec![Ack::Stopped.as_str().as_bytes().to_vec()],
            "L" => {
                let pairs = self
                    .announced_length
                    .map(|last| (usize::from(last) + 1) / 2)
                    .unwrap_or(0);
                self.memory = instruction_bytes(&vec![Instruction::new(50, 50); pairs]);
                vec![Ack::Full.as_str().as_bytes().to_vec()]
            }
            "B" => self.download_stream(),
            "I?" => vec![latin1_encode(&format!("I={}", self.interval))],
            t if t.starts_with('I') => match t[1..].parse::<u32>() {
                Ok(value) => {
                    self.interval = value;
                    vec![latin1_encode(&format!("I={}", value))]
                }
                Err(_) => Vec::new(),
            },
            t if t.len() == 5 && t.starts_with('d') => {
                self.announced_length = u16::from_str_radix(&t[1..], 16).ok();
                Vec::new()
            }
            other => {
                debug!("MockRobot ignoring {:?}", other);
                Vec::new()
            }
        }
    }

    fn handle_upload(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        if data == b"end" {
            self.uploading = false;
            self.memory = std::mem::take(&mut self.upload_buffer);
            return vec![Ack::Full.as_str().as_bytes().to_vec()];
        }
        match self.protocol() {
            Some(ProtocolVersion::V3) => {
                if let Some(pair) = parse_upload_line(&latin1_decode(data)) {
                    self.upload_buffer.extend_from_slice(&pair);
                }
            }
            _ => self.upload_buffer.extend_from_slice(data),
        }
        Vec::new()
    }

    fn download_stream(&mut self) -> Vec<Vec<u8>> {
        if self.protocol().is_some_and(|version| !version.is_binary()) {
            let mut lines: Vec<Vec<u8>> = self
                .memory
                .chunks_exact(2)
                .map(|pair| latin1_encode(&format!("{:03},{:03}", pair[0], pair[1])))
                .collect();
            lines.push(Ack::DownloadEnd.as_str().as_bytes().to_vec());
            return lines;
        }

        let total = u16::try_from(self.memory.len()).unwrap_or(u16::MAX);
        let mut header = [0u8; 2];
        BigEndian::write_u16(&mut header, total);
        let mut stream = vec![header.to_vec()];

        let chunk = payload_len(u64::from(total));
        for index in 0..expected_packets(u64::from(total)) {
            let sequence = (index % 256) as u8;
            if self.dropped_sequences.contains(&sequence) {
                debug!("MockRobot dropping payload {}", sequence);
                continue;
            }
            if let Some((rate, rng)) = self.packet_loss.as_mut() {
                if rng.gen_bool(*rate) {
                    debug!("MockRobot randomly dropping payload {}", sequence);
                    continue;
                }
            }
            let start = (index * chunk).min(self.memory.len());
            let end = (start + chunk).min(self.memory.len());
            let mut packet = vec![sequence];
            packet.extend_from_slice(&self.memory[start..end]);
            stream.push(packet);
        }
        stream
    }
}

/// Parse one `lll,rrrxx` upload line into its wire bytes
fn parse_upload_line(line: &str) -> Option<[u8; 2]> {
    let body = line.trim().strip_suffix("xx")?;
    let (left, right) = body.split_once(',')?;
    Some([left.parse().ok()?, right.parse().ok()?])
}

/// Simulated robot link
pub struct MockRobot {
    id: String,
    name: String,
    state: Mutex<RobotState>,
    subscribers: Arc<Mutex<Subscribers>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockRobot {
    /// Create a connected robot reporting `firmware_version`
    pub fn new(firmware_version: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: "BotLink Demo".to_string(),
            state: Mutex::new(RobotState {
                firmware_version,
                interval: 1,
                responding: true,
                connected: true,
                uploading: false,
                upload_buffer: Vec::new(),
                announced_length: None,
                memory: Vec::new(),
                written: Vec::new(),
                dropped_sequences: Vec::new(),
                packet_loss: None,
                version_reply: None,
                write_failure: None,
            }),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    /// Use a custom device name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Start with a stored program
    pub fn with_program(self, instructions: &[Instruction]) -> Self {
        lock(&self.state).memory = instruction_bytes(instructions);
        self
    }

    /// Start with a sampling interval
    pub fn with_interval(self, interval: u32) -> Self {
        lock(&self.state).interval = interval;
        self
    }

    /// Answer `Z` with `reply` instead of `VER <n>`
    pub fn with_version_reply(self, reply: impl Into<String>) -> Self {
        lock(&self.state).version_reply = Some(reply.into());
        self
    }

    /// Never send download payloads carrying these sequence numbers
    pub fn with_dropped_sequences(self, sequences: &[u8]) -> Self {
        lock(&self.state).dropped_sequences = sequences.to_vec();
        self
    }

    /// Drop each download payload with probability `rate`, reproducibly
    pub fn with_packet_loss(self, rate: f64, seed: u64) -> Self {
        lock(&self.state).packet_loss = Some((rate.clamp(0.0, 1.0), StdRng::seed_from_u64(seed)));
        self
    }

    /// Stop or resume answering writes (writes are still recorded)
    pub fn set_responding(&self, responding: bool) {
        lock(&self.state).responding = responding;
    }

    /// Make every write fail with [`ProtocolError::LinkError`], or heal the link with `None`
    pub fn set_write_failure(&self, reason: Option<&str>) {
        lock(&self.state).write_failure = reason.map(str::to_string);
    }

    /// Every payload written so far
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state).written.clone()
    }

    /// Every payload written so far, Latin-1 decoded
    pub fn written_text(&self) -> Vec<String> {
        lock(&self.state)
            .written
            .iter()
            .map(|w| latin1_decode(w))
            .collect()
    }

    /// Forget recorded writes
    pub fn clear_written(&self) {
        lock(&self.state).written.clear();
    }

    /// The stored program, decoded
    pub fn program(&self) -> Vec<Instruction> {
        decode_pairs(&lock(&self.state).memory)
    }

    /// Current sampling interval
    pub fn interval(&self) -> u32 {
        lock(&self.state).interval
    }

    /// True until the link is dropped or disconnected
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Number of live data and disconnect subscriptions
    pub fn subscriber_count(&self) -> usize {
        let subscribers = lock(&self.subscribers);
        subscribers.data.len() + subscribers.disconnect.len()
    }

    /// Deliver an unsolicited payload to subscribers
    pub fn push_inbound(&self, data: &[u8]) {
        self.deliver(data);
    }

    /// Simulate the radio link dropping
    pub fn drop_link(&self) {
        lock(&self.state).connected = false;
        let callbacks: Vec<SharedDisconnect> =
            lock(&self.subscribers).disconnect.values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }

    fn deliver(&self, data: &[u8]) {
        let callbacks: Vec<SharedData> = lock(&self.subscribers).data.values().cloned().collect();
        for callback in callbacks {
            callback(data);
        }
    }
}

impl RobotLink for MockRobot {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, data: &[u8]) -> Result<(), ProtocolError> {
        let responses = {
            let mut state = lock(&self.state);
            if !state.connected {
                return Err(ProtocolError::ConnectionClosed);
            }
            if let Some(reason) = &state.write_failure {
                return Err(ProtocolError::LinkError(reason.clone()));
            }
            state.written.push(data.to_vec());
            let responses = state.handle(data);
            if state.responding {
                responses
            } else {
                Vec::new()
            }
        };
        for response in responses {
            self.deliver(&response);
        }
        Ok(())
    }

    fn on_data_received(&self, callback: DataCallback) -> Subscription {
        let mut subscribers = lock(&self.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.data.insert(id, Arc::from(callback));

        let registry = self.subscribers.clone();
        Subscription::new(move || {
            lock(&registry).data.remove(&id);
        })
    }

    fn on_disconnect(&self, callback: DisconnectCallback) -> Subscription {
        let mut subscribers = lock(&self.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.disconnect.insert(id, Arc::from(callback));

        let registry = self.subscribers.clone();
        Subscription::new(move || {
            lock(&registry).disconnect.remove(&id);
        })
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        let was_connected = std::mem::replace(&mut lock(&self.state).connected, false);
        if was_connected {
            let callbacks: Vec<SharedDisconnect> =
                lock(&self.subscribers).disconnect.values().cloned().collect();
            for callback in callbacks {
                callback();
            }
        }
        Ok(())
    }
}
