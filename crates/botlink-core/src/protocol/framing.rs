//! Wire framing helpers
//!
//! Builds and parses the byte layouts used by the three protocol
//! generations:
//! - `d%04X` : data length announcement, value = byte count - 1
//! - `%03d,%03dxx` : one V3 upload line (wire bytes, zero padded)
//! - `[l, r, l, r, ...]` : V6/V10 binary instruction blob
//! - `I=<n>` / `VER <n>` : interval and version replies

use std::sync::OnceLock;

use byteorder::{BigEndian, ByteOrder};
use regex::Regex;

use super::commands::{Command, INTERVAL_RESPONSE_PREFIX, VERSION_RESPONSE_PREFIX};
use super::{Instruction, ProtocolError};

/// Encode text as Latin-1; characters outside the range become `?`
pub fn latin1_encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Decode a Latin-1 payload
pub fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Build the `d<hex>` command announcing `pairs` motor pairs.
///
/// The firmware expects `pairs * 2 - 1`, the index of the last byte.
pub fn data_length_command(pairs: u64) -> Result<Command, ProtocolError> {
    if pairs == 0 {
        return Err(ProtocolError::InvalidArgument(
            "data length must cover at least one instruction".to_string(),
        ));
    }
    let last_index = pairs
        .checked_mul(2)
        .map(|bytes| bytes - 1)
        .unwrap_or(u64::MAX);
    let value = u16::try_from(last_index).map_err(|_| {
        ProtocolError::InvalidArgument(format!(
            "data length {} does not fit in four hex digits",
            last_index
        ))
    })?;
    Ok(Command::DataLength(value))
}

/// One V3 upload line: `"<left3>,<right3>xx"`
pub fn v3_instruction_line(instruction: &Instruction) -> String {
    let [left, right] = instruction.to_wire();
    format!("{:03},{:03}xx", left, right)
}

/// Interleaved `(left, right)` wire bytes for a list of instructions
pub fn instruction_bytes(instructions: &[Instruction]) -> Vec<u8> {
    instructions
        .iter()
        .flat_map(|instruction| instruction.to_wire())
        .collect()
}

/// Split an instruction list into upload writes of at most `chunk_size`
/// instructions each
pub fn upload_chunks(
    instructions: &[Instruction],
    chunk_size: usize,
) -> impl Iterator<Item = Vec<u8>> + '_ {
    instructions
        .chunks(chunk_size.max(1))
        .map(instruction_bytes)
}

/// Decode whole `(left, right)` pairs; a trailing odd byte is ignored
pub fn decode_pairs(bytes: &[u8]) -> Vec<Instruction> {
    bytes
        .chunks_exact(2)
        .map(|pair| Instruction::from_wire(pair[0], pair[1]))
        .collect()
}

fn v3_pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{3}),(\d{3})").expect("static regex"))
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"^{}(\d+)$", VERSION_RESPONSE_PREFIX)).expect("static regex")
    })
}

/// Pattern a version reply must match
pub fn version_pattern() -> &'static Regex {
    version_regex()
}

/// Parse every `ddd,ddd` pair in one V3 download line
pub fn parse_v3_pairs(line: &str) -> Vec<Instruction> {
    v3_pair_regex()
        .captures_iter(line)
        .filter_map(|caps| {
            let left = caps[1].parse::<u8>().ok()?;
            let right = caps[2].parse::<u8>().ok()?;
            Some(Instruction::from_wire(left, right))
        })
        .collect()
}

/// Parse an `I=<n>` interval reply
pub fn parse_interval(text: &str) -> Option<u32> {
    text.trim()
        .strip_prefix(INTERVAL_RESPONSE_PREFIX)?
        .trim()
        .parse()
        .ok()
}

/// Parse a `VER <n>` version reply
pub fn parse_version(text: &str) -> Option<u32> {
    version_regex()
        .captures(text.trim())
        .and_then(|caps| caps[1].parse().ok())
}

/// Decode a big-endian unsigned integer of up to eight bytes
pub fn read_be_uint(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    Some(BigEndian::read_uint(bytes, bytes.len()))
}
