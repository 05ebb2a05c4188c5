//! # tsflow Core
//!
//! Core types for the tsflow transport stream pipeline.
//!
//! This crate provides the fundamental building blocks used across all
//! tsflow components:
//! - Error handling types
//! - The 188-byte transport stream packet
//! - Per-packet metadata (labels, flags, timestamps)
//! - Bitrate values and confidence tags
//! - Diagnostic report sinks
//! - Running statistics

pub mod bitrate;
pub mod error;
pub mod metadata;
pub mod packet;
pub mod report;
pub mod stats;

pub use bitrate::{Bitrate, BitrateConfidence, PKT_SIZE_BITS};
pub use error::{Error, Result};
pub use metadata::{LabelSet, PacketMetadata, MAX_LABEL};
pub use packet::{TsPacket, PACKET_SIZE, PID_MAX, PID_NULL, SYNC_BYTE};
pub use report::{CaptureReport, LogReport, NullReport, Report, Severity};
pub use stats::RunningStats;
