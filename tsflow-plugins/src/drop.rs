//! Discarding output.

use clap::Command;
use tsflow_core::{PacketMetadata, TsPacket};
use tsflow_plugin::{OutputPlugin, Plugin, PluginContext, Result};

/// Output plugin discarding every packet.
#[derive(Default)]
pub struct DropOutput;

impl DropOutput {
    /// Create a discarding output.
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for DropOutput {
    fn description(&self) -> &'static str {
        "Discard packets"
    }

    fn options(&self) -> Command {
        Command::new("drop")
    }
}

impl OutputPlugin for DropOutput {
    fn send(
        &mut self,
        _packets: &[TsPacket],
        _metadata: &[PacketMetadata],
        _ctx: &mut dyn PluginContext,
    ) -> Result<()> {
        Ok(())
    }
}
