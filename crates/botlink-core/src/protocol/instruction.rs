//! Motor instructions

use serde::{Deserialize, Serialize};

use super::speed::{decode_speed, encode_speed};

/// One left/right motor speed pair, each a percentage in `0..=100`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    /// Left motor speed (0-100)
    pub left_motor_speed: u8,
    /// Right motor speed (0-100)
    pub right_motor_speed: u8,
}

impl Instruction {
    /// Create an instruction from two speed percentages
    pub fn new(left_motor_speed: u8, right_motor_speed: u8) -> Self {
        Self {
            left_motor_speed,
            right_motor_speed,
        }
    }

    /// Both motors stopped
    pub fn stopped() -> Self {
        Self::default()
    }

    /// Encode as the `(left, right)` wire byte pair
    pub fn to_wire(&self) -> [u8; 2] {
        [
            encode_speed(self.left_motor_speed),
            encode_speed(self.right_motor_speed),
        ]
    }

    /// Decode from a `(left, right)` wire byte pair
    pub fn from_wire(left: u8, right: u8) -> Self {
        Self::new(decode_speed(left), decode_speed(right))
    }

    /// True if both speeds are within one percent of `other`
    pub fn approx_eq(&self, other: &Instruction) -> bool {
        self.left_motor_speed.abs_diff(other.left_motor_speed) <= 1
            && self.right_motor_speed.abs_diff(other.right_motor_speed) <= 1
    }
}

impl From<(u8, u8)> for Instruction {
    fn from((left, right): (u8, u8)) -> Self {
        Self::new(left, right)
    }
}
