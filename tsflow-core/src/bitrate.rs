//! Bitrate values and measurement confidence.

use std::fmt;

/// Size of a TS packet in bits, as used in bitrate computations.
pub const PKT_SIZE_BITS: u64 = 8 * crate::packet::PACKET_SIZE as u64;

/// A bitrate in bits per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bitrate(u64);

impl Bitrate {
    /// Zero bitrate (unknown or idle).
    pub const ZERO: Self = Self(0);

    /// Create a bitrate from bits per second.
    pub const fn new(bits_per_second: u64) -> Self {
        Self(bits_per_second)
    }

    /// Get the value in bits per second.
    pub const fn bits_per_second(self) -> u64 {
        self.0
    }

    /// Check if the bitrate is zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for Bitrate {
    fn from(bits_per_second: u64) -> Self {
        Self(bits_per_second)
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} b/s", self.0)
    }
}

/// Quality tag on a bitrate measurement.
///
/// When two sources disagree, the higher confidence wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BitrateConfidence {
    /// Weak estimate (startup value or guess).
    #[default]
    Low,
    /// Averaged from clock references in the stream.
    PcrAverage,
    /// Measured against the system monotonic clock.
    Clock,
    /// Explicitly set by the user, overrides measurements.
    Override,
}
