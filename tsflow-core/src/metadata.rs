//! Per-packet metadata: labels, flags and timestamps.
//!
//! Each slot of the pipeline's packet buffer carries one
//! [`PacketMetadata`] record alongside the packet itself. Plugins mark
//! packets by setting labels; the pipeline uses the flags to track
//! which slots still hold a valid packet.

use std::fmt;
use std::time::Duration;

/// Highest valid packet label.
pub const MAX_LABEL: usize = 31;

/// A set of packet labels (small integers in `0..=MAX_LABEL`).
///
/// Stored as a 32-bit mask. Labels are set by plugins and travel with
/// the packet through the buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelSet(u32);

impl LabelSet {
    /// The empty label set.
    pub const EMPTY: Self = Self(0);

    /// Create a set from an iterator of label values.
    ///
    /// Labels above [`MAX_LABEL`] are ignored.
    pub fn from_labels<I: IntoIterator<Item = usize>>(labels: I) -> Self {
        let mut set = Self::EMPTY;
        for label in labels {
            set.set(label);
        }
        set
    }

    /// Set one label. Labels above [`MAX_LABEL`] are ignored.
    pub fn set(&mut self, label: usize) {
        if label <= MAX_LABEL {
            self.0 |= 1 << label;
        }
    }

    /// Clear one label.
    pub fn clear(&mut self, label: usize) {
        if label <= MAX_LABEL {
            self.0 &= !(1 << label);
        }
    }

    /// Test one label.
    pub fn test(&self, label: usize) -> bool {
        label <= MAX_LABEL && (self.0 & (1 << label)) != 0
    }

    /// Remove all labels.
    pub fn clear_all(&mut self) {
        self.0 = 0;
    }

    /// Check if no label is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of labels in the set.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate over the labels in the set, in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mask = self.0;
        (0..=MAX_LABEL).filter(move |l| (mask & (1 << l)) != 0)
    }
}

impl std::ops::BitOr for LabelSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for LabelSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromIterator<usize> for LabelSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::from_labels(iter)
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for label in self.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", label)?;
            first = false;
        }
        Ok(())
    }
}

/// Metadata attached to one packet slot.
#[derive(Debug, Clone, Default)]
pub struct PacketMetadata {
    /// Labels set on this packet.
    labels: LabelSet,
    /// Time since pipeline start when the packet entered the input stage.
    timestamp: Option<Duration>,
    /// The packet was inserted as stuffing by the input stage.
    input_stuffing: bool,
    /// The slot no longer holds a valid packet (dropped by a processor).
    nullified: bool,
}

impl PacketMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the empty state, for slot reuse.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Get the label set.
    pub fn labels(&self) -> LabelSet {
        self.labels
    }

    /// Add all labels from `set` to this packet.
    pub fn set_labels(&mut self, set: LabelSet) {
        self.labels |= set;
    }

    /// Set one label.
    pub fn set_label(&mut self, label: usize) {
        self.labels.set(label);
    }

    /// Clear one label.
    pub fn clear_label(&mut self, label: usize) {
        self.labels.clear(label);
    }

    /// Test one label.
    pub fn has_label(&self, label: usize) -> bool {
        self.labels.test(label)
    }

    /// Get the input timestamp.
    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    /// Set the input timestamp.
    pub fn set_timestamp(&mut self, timestamp: Duration) {
        self.timestamp = Some(timestamp);
    }

    /// Check the input-stuffing flag.
    pub fn input_stuffing(&self) -> bool {
        self.input_stuffing
    }

    /// Set the input-stuffing flag.
    pub fn set_input_stuffing(&mut self, stuffing: bool) {
        self.input_stuffing = stuffing;
    }

    /// Check whether the slot still holds a valid packet.
    pub fn is_valid(&self) -> bool {
        !self.nullified
    }

    /// Mark the slot as no longer holding a valid packet.
    pub fn nullify(&mut self) {
        self.nullified = true;
    }
}
