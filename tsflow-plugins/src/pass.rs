//! Pass-through processor.

use clap::Command;
use tsflow_core::{PacketMetadata, TsPacket};
use tsflow_plugin::{PacketStatus, Plugin, PluginContext, ProcessorPlugin};

/// Processor plugin passing every packet unchanged.
#[derive(Default)]
pub struct PassProcessor;

impl PassProcessor {
    /// Create a pass-through processor.
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for PassProcessor {
    fn description(&self) -> &'static str {
        "Pass packets unchanged"
    }

    fn options(&self) -> Command {
        Command::new("pass")
    }
}

impl ProcessorPlugin for PassProcessor {
    fn process_packet(
        &mut self,
        _packet: &mut TsPacket,
        _metadata: &mut PacketMetadata,
        _ctx: &mut dyn PluginContext,
    ) -> PacketStatus {
        PacketStatus::Pass
    }
}
