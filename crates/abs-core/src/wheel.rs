//! Wheel identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AbsError;

/// Number of monitored wheels
pub const WHEEL_COUNT: usize = 4;

/// Position of a wheel-speed sensor on the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelPosition {
    FrontLeft = 0,
    FrontRight = 1,
    RearLeft = 2,
    RearRight = 3,
}

impl WheelPosition {
    /// All wheels in processing order
    pub const ALL: [WheelPosition; WHEEL_COUNT] = [
        WheelPosition::FrontLeft,
        WheelPosition::FrontRight,
        WheelPosition::RearLeft,
        WheelPosition::RearRight,
    ];

    /// Array index of this wheel
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short name used in logs and config files
    pub fn short_name(self) -> &'static str {
        match self {
            WheelPosition::FrontLeft => "FL",
            WheelPosition::FrontRight => "FR",
            WheelPosition::RearLeft => "RL",
            WheelPosition::RearRight => "RR",
        }
    }

    /// Persistence block holding this wheel's calibration
    pub fn block_id(self) -> u16 {
        0x1001 + self as u16
    }
}

impl TryFrom<usize> for WheelPosition {
    type Error = AbsError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        WheelPosition::ALL
            .get(value)
            .copied()
            .ok_or(AbsError::InvalidWheel(value))
    }
}

impl TryFrom<u8> for WheelPosition {
    type Error = AbsError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        WheelPosition::try_from(value as usize)
    }
}

impl fmt::Display for WheelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Fixed arena with one slot per wheel
pub type PerWheel<T> = [T; WHEEL_COUNT];
