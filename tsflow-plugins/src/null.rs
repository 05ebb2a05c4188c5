//! Null packet generator input.

use clap::{Arg, ArgAction, Command};
use tsflow_core::{PacketMetadata, TsPacket};
use tsflow_plugin::{InputPlugin, Plugin, PluginContext, Result};

/// Input plugin generating null packets.
///
/// Without `--count`, packets are generated until the pipeline stops;
/// with `--count`, end of input is signalled once that many packets
/// have been produced.
#[derive(Default)]
pub struct NullInput {
    count: Option<u64>,
    remaining: Option<u64>,
}

impl NullInput {
    /// Create an unconfigured null input.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Plugin for NullInput {
    fn description(&self) -> &'static str {
        "Generate null packets"
    }

    fn options(&self) -> Command {
        Command::new("null").arg(
            Arg::new("count")
                .long("count")
                .short('c')
                .value_name("packets")
                .help("Number of packets to generate, then end the input. Default: no limit.")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(u64)),
        )
    }

    fn configure(
        &mut self,
        matches: &clap::ArgMatches,
        _ctx: &mut dyn PluginContext,
    ) -> Result<()> {
        self.count = matches.get_one::<u64>("count").copied();
        Ok(())
    }

    fn start(&mut self, _ctx: &mut dyn PluginContext) -> Result<()> {
        self.remaining = self.count;
        Ok(())
    }

    fn reset_context(&mut self) {
        self.remaining = None;
    }
}

impl InputPlugin for NullInput {
    fn receive(
        &mut self,
        packets: &mut [TsPacket],
        _metadata: &mut [PacketMetadata],
        _ctx: &mut dyn PluginContext,
    ) -> Result<usize> {
        let produced = match self.remaining {
            None => packets.len(),
            Some(remaining) => packets.len().min(remaining as usize),
        };
        for packet in packets[..produced].iter_mut() {
            *packet = TsPacket::null_packet();
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= produced as u64;
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockContext;
    use tsflow_plugin::analyze;

    fn configured(args: &[&str]) -> NullInput {
        let mut plugin = NullInput::new();
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let matches = analyze("null", &plugin, &args).unwrap();
        let mut ctx = MockContext::new();
        plugin.configure(&matches, &mut ctx).unwrap();
        plugin.start(&mut ctx).unwrap();
        plugin
    }

    #[test]
    fn test_unlimited_fills_whole_window() {
        let mut plugin = configured(&[]);
        let mut ctx = MockContext::new();
        let mut packets = vec![TsPacket::with_pid(0x100).unwrap(); 16];
        let mut metadata = vec![PacketMetadata::new(); 16];

        let produced = plugin
            .receive(&mut packets, &mut metadata, &mut ctx)
            .unwrap();
        assert_eq!(produced, 16);
        assert!(packets.iter().all(|p| p.is_null()));
    }

    #[test]
    fn test_count_limits_production() {
        let mut plugin = configured(&["--count", "10"]);
        let mut ctx = MockContext::new();
        let mut packets = vec![TsPacket::null_packet(); 8];
        let mut metadata = vec![PacketMetadata::new(); 8];

        assert_eq!(
            plugin
                .receive(&mut packets, &mut metadata, &mut ctx)
                .unwrap(),
            8
        );
        assert_eq!(
            plugin
                .receive(&mut packets, &mut metadata, &mut ctx)
                .unwrap(),
            2
        );
        // Exhausted: end of input.
        assert_eq!(
            plugin
                .receive(&mut packets, &mut metadata, &mut ctx)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_restart_resets_budget() {
        let mut plugin = configured(&["--count", "4"]);
        let mut ctx = MockContext::new();
        let mut packets = vec![TsPacket::null_packet(); 8];
        let mut metadata = vec![PacketMetadata::new(); 8];

        assert_eq!(
            plugin
                .receive(&mut packets, &mut metadata, &mut ctx)
                .unwrap(),
            4
        );

        plugin.reset_context();
        plugin.start(&mut ctx).unwrap();
        assert_eq!(
            plugin
                .receive(&mut packets, &mut metadata, &mut ctx)
                .unwrap(),
            4
        );
    }
}
