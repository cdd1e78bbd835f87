//! Motor speed codec
//!
//! The application works with speeds as percentages (0-100) while the
//! firmware stores one byte per motor (0-255).

/// Scale factor between a percentage and a wire byte
const WIRE_SCALE: f64 = 2.55;

/// Convert a motor speed percentage to its wire byte.
///
/// Zero is mapped explicitly so a stopped motor is never sent as anything
/// but `0`. Inputs above 100 saturate at 255.
pub fn encode_speed(percentage: u8) -> u8 {
    if percentage == 0 {
        return 0;
    }
    (f64::from(percentage) * WIRE_SCALE + 0.5).floor() as u8
}

/// Convert a wire byte back to a motor speed percentage
pub fn decode_speed(byte: u8) -> u8 {
    (f64::from(byte) / WIRE_SCALE).round() as u8
}
