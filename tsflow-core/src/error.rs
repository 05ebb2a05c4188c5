//! Error types for the tsflow core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Packet data does not start with the TS sync byte.
    #[error("invalid sync byte: 0x{0:02X}")]
    InvalidSyncByte(u8),

    /// Packet data shorter than 188 bytes.
    #[error("packet too short: {0} bytes")]
    PacketTooShort(usize),

    /// PID value outside the 13-bit range.
    #[error("invalid PID: 0x{0:04X}")]
    InvalidPid(u16),

    /// Packet label outside the supported range.
    #[error("label out of range: {0}")]
    InvalidLabel(usize),
}

/// Core result type.
pub type Result<T> = std::result::Result<T, Error>;
