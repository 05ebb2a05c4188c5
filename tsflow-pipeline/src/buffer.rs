//! The shared packet buffer.
//!
//! One fixed-capacity buffer of packets plus a parallel buffer of
//! metadata records is shared by all stages of a pipeline. The buffer
//! itself does no locking: at any time it is partitioned into disjoint
//! contiguous windows, one per stage, and the ring protocol guarantees
//! that a stage only ever touches slots inside its own window.

use std::slice;
use tsflow_core::{PacketMetadata, TsPacket};

/// Fixed-capacity storage for packets and their metadata.
///
/// Slots are addressed `0..capacity` with wrap-around handled by the
/// ring; a single [`window`](Self::window) call only ever spans a
/// contiguous, non-wrapping range.
pub(crate) struct PacketBuffer {
    packets: *mut [TsPacket],
    metadata: *mut [PacketMetadata],
    capacity: usize,
}

// The buffer hands out disjoint mutable windows to the stage threads;
// exclusivity is enforced by the ring protocol, not by the type system.
unsafe impl Send for PacketBuffer {}
unsafe impl Sync for PacketBuffer {}

impl PacketBuffer {
    /// Allocate a buffer of `capacity` null packets with empty metadata.
    pub(crate) fn new(capacity: usize) -> Self {
        let packets = vec![TsPacket::null_packet(); capacity].into_boxed_slice();
        let metadata = vec![PacketMetadata::new(); capacity].into_boxed_slice();
        Self {
            packets: Box::into_raw(packets),
            metadata: Box::into_raw(metadata),
            capacity,
        }
    }

    /// Number of packet slots.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get mutable access to the contiguous slot range
    /// `first..first + count`.
    ///
    /// # Safety
    ///
    /// The caller must own the window per the ring protocol: no other
    /// thread may access any slot in `first..first + count` for the
    /// lifetime of the returned slices. The range must not wrap:
    /// `first + count <= capacity`.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn window(
        &self,
        first: usize,
        count: usize,
    ) -> (&mut [TsPacket], &mut [PacketMetadata]) {
        debug_assert!(first + count <= self.capacity, "window wraps the buffer");
        // SAFETY: the range is in bounds and, per the caller's window
        // ownership, not aliased by any other live slice.
        unsafe {
            (
                slice::from_raw_parts_mut(self.packets.cast::<TsPacket>().add(first), count),
                slice::from_raw_parts_mut(self.metadata.cast::<PacketMetadata>().add(first), count),
            )
        }
    }
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        // SAFETY: the pointers were created by Box::into_raw in new()
        // and are dropped exactly once.
        unsafe {
            drop(Box::from_raw(self.packets));
            drop(Box::from_raw(self.metadata));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_initialized_with_null_packets() {
        let buffer = PacketBuffer::new(4);
        assert_eq!(buffer.capacity(), 4);

        let (packets, metadata) = unsafe { buffer.window(0, 4) };
        assert!(packets.iter().all(|p| p.is_null()));
        assert!(metadata.iter().all(|m| m.is_valid()));
    }

    #[test]
    fn test_disjoint_windows() {
        let buffer = PacketBuffer::new(8);

        let (left, _) = unsafe { buffer.window(0, 4) };
        let (right, _) = unsafe { buffer.window(4, 4) };

        left[0].set_pid(0x0100);
        right[0].set_pid(0x0200);

        assert_eq!(left[0].pid(), 0x0100);
        assert_eq!(right[0].pid(), 0x0200);
    }

    #[test]
    fn test_window_writes_persist() {
        let buffer = PacketBuffer::new(2);
        {
            let (packets, metadata) = unsafe { buffer.window(1, 1) };
            packets[0].set_pid(0x42);
            metadata[0].set_label(7);
        }
        let (packets, metadata) = unsafe { buffer.window(1, 1) };
        assert_eq!(packets[0].pid(), 0x42);
        assert!(metadata[0].has_label(7));
    }
}
