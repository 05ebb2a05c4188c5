//! Plugin SDK for extending the tsflow packet pipeline.
//!
//! A tsflow pipeline is a chain of plugins: one input, any number of
//! packet processors, one output. This crate provides everything a
//! plugin needs:
//!
//! - The plugin traits: [`InputPlugin`], [`ProcessorPlugin`],
//!   [`OutputPlugin`], with the common [`Plugin`] lifecycle.
//! - [`PluginContext`], the interface the hosting stage exposes to the
//!   plugin (report sink, packet timeout, event signalling, current
//!   bitrate, packet counters).
//! - Command-line style argument analysis for plugin options, built on
//!   `clap` in library mode ([`analyze`]).
//! - A [`PluginRegistry`] mapping plugin names to factories.
//!
//! # Writing a processor plugin
//!
//! ```
//! use tsflow_core::{PacketMetadata, TsPacket};
//! use tsflow_plugin::{PacketStatus, Plugin, PluginContext, ProcessorPlugin};
//!
//! struct CountNull {
//!     nulls: u64,
//! }
//!
//! impl Plugin for CountNull {
//!     fn description(&self) -> &'static str {
//!         "Count null packets"
//!     }
//!
//!     fn options(&self) -> clap::Command {
//!         clap::Command::new("count-null")
//!     }
//! }
//!
//! impl ProcessorPlugin for CountNull {
//!     fn process_packet(
//!         &mut self,
//!         packet: &mut TsPacket,
//!         _metadata: &mut PacketMetadata,
//!         _ctx: &mut dyn PluginContext,
//!     ) -> PacketStatus {
//!         if packet.is_null() {
//!             self.nulls += 1;
//!         }
//!         PacketStatus::Pass
//!     }
//! }
//! ```

mod api;
mod args;
mod error;
mod registry;

pub use api::{
    BoxedPlugin, InputPlugin, OutputPlugin, PacketStatus, Plugin, PluginContext, PluginKind,
    ProcessorPlugin,
};
pub use args::analyze;
pub use error::{Error, Result};
pub use registry::PluginRegistry;
