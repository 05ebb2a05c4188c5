//! Plugin traits and the stage-provided context.

use crate::error::Result;
use std::fmt;
use std::time::Duration;
use tsflow_core::{Bitrate, BitrateConfidence, PacketMetadata, Report, TsPacket};

/// The kind of a plugin, which fixes its position in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Produces packets into the pipeline.
    Input,
    /// Transforms, marks or drops packets in place.
    Processor,
    /// Consumes packets leaving the pipeline.
    Output,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginKind::Input => "input",
            PluginKind::Processor => "processor",
            PluginKind::Output => "output",
        };
        f.write_str(name)
    }
}

/// Verdict of a processor on one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    /// Pass the packet downstream unchanged (or transformed in place).
    Pass,
    /// Remove the packet from the stream.
    Drop,
    /// Replace the packet with a null packet.
    Null,
    /// End of stream: this packet and all following ones are discarded,
    /// downstream drains and the pipeline terminates.
    End,
    /// Abort the whole pipeline.
    Abort,
}

/// Services the hosting stage exposes to its plugin.
///
/// A context is handed to every plugin call. Its mutations (packet
/// timeout) take effect before the stage next waits for work; plugins
/// must not assume them to be globally visible earlier.
pub trait PluginContext {
    /// Display name of the hosting stage.
    fn stage_name(&self) -> &str;

    /// Position of the hosting stage in the chain (0 = input).
    fn stage_index(&self) -> usize;

    /// Total number of stages in the chain.
    fn stage_count(&self) -> usize;

    /// The plugin's current diagnostic sink.
    fn report(&self) -> &dyn Report;

    /// Limit how long the stage blocks waiting for packets.
    ///
    /// `None` (the default) waits forever. When the timeout elapses the
    /// stage calls [`Plugin::handle_packet_timeout`].
    fn set_packet_timeout(&mut self, timeout: Option<Duration>);

    /// Invoke the registered event handlers with the given event code.
    fn signal_event(&self, code: u32);

    /// Last bitrate propagated to this stage.
    fn bitrate(&self) -> Bitrate;

    /// Confidence of [`bitrate`](Self::bitrate).
    fn bitrate_confidence(&self) -> BitrateConfidence;

    /// Packets handled by the plugin since its last (re)start.
    fn plugin_packets(&self) -> u64;

    /// Packets handled by the stage since the pipeline started.
    fn total_packets(&self) -> u64;

    /// Whether the stage has been asked to abort, as last observed.
    ///
    /// Long-running plugin operations should poll this and bail out.
    fn aborting(&self) -> bool;
}

/// Lifecycle shared by all plugin kinds.
///
/// A plugin goes through `options` → `configure` → `start`, then its
/// kind-specific operation is called repeatedly, then `stop`. On a
/// stage restart the sequence resumes at `reset_context`.
pub trait Plugin: Send {
    /// One-line description of the plugin.
    fn description(&self) -> &'static str;

    /// Declare the accepted arguments.
    ///
    /// The returned command is analyzed in library mode: it never
    /// exits the process and never prints to stdout.
    fn options(&self) -> clap::Command;

    /// Read back analyzed argument values.
    fn configure(
        &mut self,
        _matches: &clap::ArgMatches,
        _ctx: &mut dyn PluginContext,
    ) -> Result<()> {
        Ok(())
    }

    /// Acquire resources and become ready to process packets.
    ///
    /// On restart, this is the resume point.
    fn start(&mut self, _ctx: &mut dyn PluginContext) -> Result<()> {
        Ok(())
    }

    /// Release resources. Called after the stage's worker loop ends and
    /// at the beginning of a restart.
    fn stop(&mut self, _ctx: &mut dyn PluginContext) -> Result<()> {
        Ok(())
    }

    /// Discard transient state accumulated by a previous session,
    /// before (re)starting.
    fn reset_context(&mut self) {}

    /// Called when the stage's packet timeout elapses while waiting.
    ///
    /// Return `true` to keep waiting, `false` to give up the wait (the
    /// stage then terminates).
    fn handle_packet_timeout(&mut self, _ctx: &mut dyn PluginContext) -> bool {
        false
    }

    /// Whether the plugin requires real-time scheduling.
    fn is_real_time(&self) -> bool {
        false
    }
}

/// A plugin producing packets into the pipeline.
pub trait InputPlugin: Plugin {
    /// Fill `packets` (and optionally `metadata`) with fresh packets.
    ///
    /// Returns the number of packets produced; 0 signals end of input.
    /// Both slices have the same length and never exceed the free space
    /// of the input stage's buffer window.
    fn receive(
        &mut self,
        packets: &mut [TsPacket],
        metadata: &mut [PacketMetadata],
        ctx: &mut dyn PluginContext,
    ) -> Result<usize>;

    /// Bitrate of the input stream, if the plugin knows it.
    fn bitrate(&self) -> Option<(Bitrate, BitrateConfidence)> {
        None
    }
}

/// A plugin transforming packets in place.
pub trait ProcessorPlugin: Plugin {
    /// Process one packet and its metadata.
    fn process_packet(
        &mut self,
        packet: &mut TsPacket,
        metadata: &mut PacketMetadata,
        ctx: &mut dyn PluginContext,
    ) -> PacketStatus;
}

/// A plugin consuming packets leaving the pipeline.
pub trait OutputPlugin: Plugin {
    /// Send a contiguous run of packets.
    fn send(
        &mut self,
        packets: &[TsPacket],
        metadata: &[PacketMetadata],
        ctx: &mut dyn PluginContext,
    ) -> Result<()>;
}

/// A plugin instance tagged with its kind.
pub enum BoxedPlugin {
    /// An input plugin.
    Input(Box<dyn InputPlugin>),
    /// A processor plugin.
    Processor(Box<dyn ProcessorPlugin>),
    /// An output plugin.
    Output(Box<dyn OutputPlugin>),
}

impl BoxedPlugin {
    /// The kind of the wrapped plugin.
    pub fn kind(&self) -> PluginKind {
        match self {
            BoxedPlugin::Input(_) => PluginKind::Input,
            BoxedPlugin::Processor(_) => PluginKind::Processor,
            BoxedPlugin::Output(_) => PluginKind::Output,
        }
    }

    /// Access the common plugin lifecycle.
    pub fn as_plugin(&self) -> &dyn Plugin {
        match self {
            BoxedPlugin::Input(p) => &**p,
            BoxedPlugin::Processor(p) => &**p,
            BoxedPlugin::Output(p) => &**p,
        }
    }

    /// Mutable access to the common plugin lifecycle.
    pub fn as_plugin_mut(&mut self) -> &mut dyn Plugin {
        match self {
            BoxedPlugin::Input(p) => &mut **p,
            BoxedPlugin::Processor(p) => &mut **p,
            BoxedPlugin::Output(p) => &mut **p,
        }
    }
}

impl fmt::Debug for BoxedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedPlugin")
            .field("kind", &self.kind())
            .field("description", &self.as_plugin().description())
            .finish()
    }
}
