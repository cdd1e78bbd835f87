//! Download packet reassembly
//!
//! Implements the packeted download stream of the binary protocols.
//!
//! Stream format:
//! - 1 header payload: total byte count, unsigned big-endian
//! - `ceil((total + 1) / 18)` data payloads, each:
//!   - 1 byte: sequence number (increments mod 256)
//!   - the next run of `(left, right)` wire pairs
//!
//! Every delivered byte is kept. A jump in sequence numbers means payloads
//! were lost, and fewer bytes than announced means the stream came up
//! short; both are reported, not re-requested: the firmware offers no
//! retransmission command.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::framing::{decode_pairs, read_be_uint};
use super::{Instruction, ProtocolError};

/// Header stride used by the firmware when announcing the packet count
pub const PACKET_STRIDE: u64 = 18;

/// Sequence jumps at or beyond this distance are read as reordering, not loss
const MAX_FORWARD_JUMP: usize = 128;

/// Number of data payloads that follow a header announcing `total_bytes`
pub fn expected_packets(total_bytes: u64) -> usize {
    usize::try_from((total_bytes + 1).div_ceil(PACKET_STRIDE)).unwrap_or(usize::MAX)
}

/// Instruction bytes per data payload when `total_bytes` are spread over
/// [`expected_packets`] payloads, rounded up to whole pairs
pub fn payload_len(total_bytes: u64) -> usize {
    let packets = expected_packets(total_bytes).max(1) as u64;
    let len = usize::try_from(total_bytes.div_ceil(packets)).unwrap_or(usize::MAX);
    len + len % 2
}

/// Decode the header payload into the announced byte count
pub fn parse_header(header: &[u8]) -> Result<u64, ProtocolError> {
    read_be_uint(header).ok_or_else(|| {
        ProtocolError::unexpected("big-endian byte count", format!("{:02x?}", header))
    })
}

/// Result of a download
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadReport {
    /// Decoded instructions, in stream order
    pub instructions: Vec<Instruction>,
    /// Indices of data payloads detected as lost
    pub lost_packets: Vec<usize>,
    /// Announced bytes that never arrived
    pub missing_bytes: u64,
    /// Byte count announced by the header (0 for the text protocol)
    pub total_bytes: u64,
    /// Data payloads announced by the header (0 for the text protocol)
    pub expected_packets: usize,
}

impl DownloadReport {
    /// True when every announced byte arrived and no payload was lost
    pub fn is_complete(&self) -> bool {
        self.lost_packets.is_empty() && self.missing_bytes == 0
    }
}

/// Per-download reassembly state.
///
/// Created fresh for every download so nothing leaks between calls or
/// sessions.
#[derive(Debug, Clone)]
pub struct DownloadReassembly {
    total_bytes: u64,
    expected_packets: usize,
    remaining: usize,
    last_sequence: Option<u8>,
    next_index: usize,
    payload: Vec<u8>,
    lost_packets: Vec<usize>,
}

impl DownloadReassembly {
    /// Start reassembling a stream of `total_bytes`
    pub fn new(total_bytes: u64) -> Self {
        let expected = expected_packets(total_bytes);
        Self {
            total_bytes,
            expected_packets: expected,
            remaining: expected,
            last_sequence: None,
            next_index: 0,
            payload: Vec::with_capacity(usize::try_from(total_bytes).unwrap_or(0).min(1 << 16)),
            lost_packets: Vec::new(),
        }
    }

    /// Start from the raw header payload
    pub fn from_header(header: &[u8]) -> Result<Self, ProtocolError> {
        let total_bytes = parse_header(header)?;
        debug!(
            "download header: {} bytes in {} packets",
            total_bytes,
            expected_packets(total_bytes)
        );
        Ok(Self::new(total_bytes))
    }

    /// Data payloads announced by the header
    pub fn expected_packets(&self) -> usize {
        self.expected_packets
    }

    /// Data payloads still outstanding (lost ones count as consumed)
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// True once every announced payload was received or accounted as lost
    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    /// Indices of payloads detected as lost so far
    pub fn lost_packets(&self) -> &[usize] {
        &self.lost_packets
    }

    /// Instruction bytes collected so far
    pub fn received_bytes(&self) -> usize {
        self.payload.len()
    }

    /// Consume one data payload
    pub fn accept(&mut self, packet: &[u8]) {
        if self.is_done() {
            warn!("Ignoring {} byte payload after end of download", packet.len());
            return;
        }

        let Some((&sequence, data)) = packet.split_first() else {
            warn!("Empty download payload at index {}", self.next_index);
            self.next_index += 1;
            self.remaining -= 1;
            return;
        };

        if let Some(last) = self.last_sequence {
            if sequence == last {
                warn!("Ignoring repeated download payload {}", sequence);
                return;
            }
            let missed = usize::from(sequence.wrapping_sub(last.wrapping_add(1)));
            if missed > 0 && missed < MAX_FORWARD_JUMP && missed < self.remaining {
                let lost = self.next_index..self.next_index + missed;
                warn!(
                    "Download sequence jumped {} -> {}, lost payloads {:?}",
                    last, sequence, lost
                );
                self.lost_packets.extend(lost);
                self.next_index += missed;
                self.remaining -= missed;
            } else if missed > 0 {
                warn!(
                    "Download sequence {} after {} is out of order, keeping it in place",
                    sequence, last
                );
            }
        }
        self.last_sequence = Some(sequence);
        self.payload.extend_from_slice(data);

        self.next_index += 1;
        self.remaining -= 1;
    }

    /// Decode the collected bytes into the final report
    pub fn finish(self) -> DownloadReport {
        let missing_bytes = self.total_bytes.saturating_sub(self.payload.len() as u64);
        if !self.lost_packets.is_empty() {
            // TODO: re-request lost payloads once the firmware exposes a retransmit command
            warn!(
                "Download finished with {} lost payloads: {:?}",
                self.lost_packets.len(),
                self.lost_packets
            );
        }
        if missing_bytes > 0 {
            warn!(
                "Download short by {} of {} announced bytes",
                missing_bytes, self.total_bytes
            );
        }
        DownloadReport {
            instructions: decode_pairs(&self.payload),
            lost_packets: self.lost_packets,
            missing_bytes,
            total_bytes: self.total_bytes,
            expected_packets: self.expected_packets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn packet(sequence: u8, data: &[u8]) -> Vec<u8> {
        let mut packet = vec![sequence];
        packet.extend_from_slice(data);
        packet
    }

    #[test]
    fn test_header_packet_count() {
        let reassembly = DownloadReassembly::from_header(&[0x00, 0x13]).unwrap();
        assert_eq!(reassembly.expected_packets(), 2);
        assert_eq!(expected_packets(0), 1);
        assert_eq!(expected_packets(17), 1);
        assert_eq!(expected_packets(35), 2);
        assert_eq!(expected_packets(36), 3);
    }

    #[test]
    fn test_payload_len_covers_announced_bytes() {
        assert_eq!(payload_len(0), 0);
        assert_eq!(payload_len(34), 18);
        assert_eq!(payload_len(40), 14);
        for pairs in [1u64, 17, 20, 72, 300, 2400, 4096] {
            let total = pairs * 2;
            let len = payload_len(total) as u64;
            assert_eq!(len % 2, 0);
            assert!(len * expected_packets(total) as u64 >= total, "{} pairs", pairs);
        }
    }

    #[test]
    fn test_empty_header_rejected() {
        assert!(matches!(
            DownloadReassembly::from_header(&[]),
            Err(ProtocolError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn test_in_order_stream_keeps_every_delivered_pair() {
        let mut reassembly = DownloadReassembly::from_header(&[0x00, 0x13]).unwrap();
        reassembly.accept(&packet(0, &[128; 16]));
        assert!(!reassembly.is_done());
        reassembly.accept(&packet(1, &[255, 0, 255, 255]));
        assert!(reassembly.is_done());

        let report = reassembly.finish();
        assert!(report.is_complete());
        assert_eq!(report.instructions.len(), 10);
        assert_eq!(report.instructions[0], Instruction::new(50, 50));
        assert_eq!(report.instructions[8], Instruction::new(100, 0));
        assert_eq!(report.instructions[9], Instruction::new(100, 100));
    }

    #[test]
    fn test_sequence_gap_is_reported() {
        let mut reassembly = DownloadReassembly::new(7 * 16);
        assert_eq!(reassembly.expected_packets(), 7);
        for sequence in [0, 1, 2, 3, 5, 6] {
            reassembly.accept(&packet(sequence, &[0; 16]));
        }
        assert!(reassembly.is_done());

        let report = reassembly.finish();
        assert_eq!(report.lost_packets, vec![4]);
        assert_eq!(report.missing_bytes, 16);
        assert_eq!(report.instructions.len(), 6 * 8);
    }

    #[test]
    fn test_short_stream_is_incomplete() {
        let mut reassembly = DownloadReassembly::new(40);
        assert_eq!(reassembly.expected_packets(), 3);
        for sequence in 0..3 {
            reassembly.accept(&packet(sequence, &[128; 8]));
        }
        assert!(reassembly.is_done());

        let report = reassembly.finish();
        assert!(report.lost_packets.is_empty());
        assert_eq!(report.missing_bytes, 16);
        assert!(!report.is_complete());
        assert_eq!(report.instructions.len(), 12);
    }

    #[test]
    fn test_sequence_wraps_without_gap() {
        let mut reassembly = DownloadReassembly::new(3 * 16);
        reassembly.accept(&packet(254, &[0; 16]));
        reassembly.accept(&packet(255, &[0; 16]));
        reassembly.accept(&packet(0, &[0; 16]));

        assert!(reassembly.is_done());
        assert!(reassembly.lost_packets().is_empty());
    }

    #[test]
    fn test_gap_across_sequence_wrap() {
        let mut reassembly = DownloadReassembly::new(8192);
        for sequence in 0..=254u8 {
            reassembly.accept(&packet(sequence, &[0; 18]));
        }
        reassembly.accept(&packet(0, &[0; 18]));

        assert_eq!(reassembly.lost_packets(), &[255]);
        assert_eq!(reassembly.remaining(), 456 - 257);
    }

    #[test]
    fn test_repeated_sequence_is_ignored() {
        let mut reassembly = DownloadReassembly::new(8192);
        assert_eq!(reassembly.expected_packets(), 456);
        reassembly.accept(&packet(0, &[0; 18]));
        reassembly.accept(&packet(0, &[0; 18]));

        assert!(reassembly.lost_packets().is_empty());
        assert_eq!(reassembly.remaining(), 455);
        assert_eq!(reassembly.received_bytes(), 18);
    }

    #[test]
    fn test_backward_jump_is_not_a_gap() {
        let mut reassembly = DownloadReassembly::new(8192);
        reassembly.accept(&packet(10, &[0; 18]));
        reassembly.accept(&packet(9, &[0; 18]));

        assert!(reassembly.lost_packets().is_empty());
        assert_eq!(reassembly.remaining(), 454);
    }
}
