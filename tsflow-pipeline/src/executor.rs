//! Stage workers.
//!
//! Each stage of the ring runs one [`StageWorker`] on its own thread.
//! The worker owns the stage's plugin and its [`StageContext`]; the
//! loop shape depends on the plugin kind, but every iteration follows
//! the same pattern: service a pending restart, wait for work, invoke
//! the plugin on the returned window slice, pass the result forward.
//!
//! Context mutations made by the plugin (packet timeout) are buffered
//! in the [`StageContext`] and synced by the worker: the ring mutex is
//! not reentrant, and plugin callbacks may run while it is held.
//!
//! A stage that terminates on an abort stops feeding its successor, so
//! its final `pass_packets` also raises end of input: downstream
//! stages drain their windows and exit without waiting on a timeout.
//! The output→input edge carries neither flag.

use crate::event::{EventContext, EventHandlerRegistry};
use crate::restart::RestartRequest;
use crate::ring::{RingShared, WaitOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use tsflow_core::{Bitrate, BitrateConfidence, Report, TsPacket};
use tsflow_plugin::{analyze, BoxedPlugin, PacketStatus, PluginContext, PluginKind};

/// Final accounting of one stage, reported at join time.
#[derive(Debug, Clone)]
pub struct StageSummary {
    /// Stage display name.
    pub name: String,
    /// Stage kind.
    pub kind: PluginKind,
    /// Packets handled by the stage over the whole run.
    pub packets: u64,
    /// False when the stage terminated on a plugin error, a fatal
    /// timeout or a failed restart.
    pub success: bool,
}

/// The executor-side implementation of [`PluginContext`].
pub(crate) struct StageContext {
    name: String,
    index: usize,
    stage_total: usize,
    report: Arc<dyn Report>,
    handlers: Arc<EventHandlerRegistry>,
    packet_timeout: Option<Duration>,
    bitrate: Bitrate,
    confidence: BitrateConfidence,
    session_packets: u64,
    total_packets: u64,
    aborting: bool,
}

impl PluginContext for StageContext {
    fn stage_name(&self) -> &str {
        &self.name
    }

    fn stage_index(&self) -> usize {
        self.index
    }

    fn stage_count(&self) -> usize {
        self.stage_total
    }

    fn report(&self) -> &dyn Report {
        &*self.report
    }

    fn set_packet_timeout(&mut self, timeout: Option<Duration>) {
        self.packet_timeout = timeout;
    }

    fn signal_event(&self, code: u32) {
        if self.handlers.is_empty() {
            return;
        }
        let context = EventContext {
            event_code: code,
            stage_name: self.name.clone(),
            stage_index: self.index,
            stage_count: self.stage_total,
            bitrate: self.bitrate,
            plugin_packets: self.session_packets,
            total_packets: self.total_packets,
        };
        self.handlers.dispatch(&context);
    }

    fn bitrate(&self) -> Bitrate {
        self.bitrate
    }

    fn bitrate_confidence(&self) -> BitrateConfidence {
        self.confidence
    }

    fn plugin_packets(&self) -> u64 {
        self.session_packets
    }

    fn total_packets(&self) -> u64 {
        self.total_packets
    }

    fn aborting(&self) -> bool {
        self.aborting
    }
}

/// One stage of the ring: a plugin plus its worker state.
pub(crate) struct StageWorker {
    index: usize,
    shared: Arc<RingShared>,
    plugin: BoxedPlugin,
    /// Arguments of the current configuration, kept for restart fallback.
    args: Vec<String>,
    ctx: StageContext,
    epoch: Instant,
}

/// Analyze `args` against the plugin options, then configure and start.
fn configure_and_start(
    plugin: &mut BoxedPlugin,
    ctx: &mut StageContext,
    args: &[String],
) -> tsflow_plugin::Result<()> {
    let matches = analyze(&ctx.name, plugin.as_plugin(), args)?;
    plugin.as_plugin_mut().configure(&matches, ctx)?;
    plugin.as_plugin_mut().start(ctx)?;
    Ok(())
}

impl StageWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        shared: Arc<RingShared>,
        plugin: BoxedPlugin,
        name: String,
        args: Vec<String>,
        report: Arc<dyn Report>,
        handlers: Arc<EventHandlerRegistry>,
        packet_timeout: Option<Duration>,
        epoch: Instant,
    ) -> Self {
        let stage_total = shared.stage_count();
        Self {
            index,
            shared,
            plugin,
            args,
            ctx: StageContext {
                name,
                index,
                stage_total,
                report,
                handlers,
                packet_timeout,
                bitrate: Bitrate::ZERO,
                confidence: BitrateConfidence::Low,
                session_packets: 0,
                total_packets: 0,
                aborting: false,
            },
            epoch,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.ctx.name
    }

    /// Analyze, configure and start the plugin, before the worker
    /// thread is spawned.
    pub(crate) fn startup(&mut self) -> tsflow_plugin::Result<()> {
        configure_and_start(&mut self.plugin, &mut self.ctx, &self.args)?;
        if self.plugin.as_plugin().is_real_time() {
            // Real-time scheduling is delegated to the deployment; the
            // request is only surfaced here.
            debug!(stage = %self.ctx.name, "plugin requests real-time scheduling");
        }
        Ok(())
    }

    /// Stop the plugin. Used when another stage failed to start.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.plugin.as_plugin_mut().stop(&mut self.ctx);
    }

    /// Run the stage to completion.
    pub(crate) fn run(mut self) -> StageSummary {
        debug!(stage = %self.ctx.name, "stage thread started");

        let ok = match self.plugin.kind() {
            PluginKind::Input => self.run_input(),
            PluginKind::Processor => self.run_processor(),
            PluginKind::Output => self.run_output(),
        };

        let stop_ok = match self.plugin.as_plugin_mut().stop(&mut self.ctx) {
            Ok(()) => true,
            Err(e) => {
                self.ctx.report.error(&format!("stop failed: {e}"));
                false
            }
        };

        debug!(
            stage = %self.ctx.name,
            packets = self.ctx.total_packets,
            "stage thread terminated"
        );

        StageSummary {
            name: self.ctx.name.clone(),
            kind: self.plugin.kind(),
            packets: self.ctx.total_packets,
            success: ok && stop_ok,
        }
    }

    /// Wait for work and refresh the context from the outcome.
    fn wait_work(&mut self, min_pkt_cnt: usize) -> WaitOutcome {
        let shared = &self.shared;
        let index = self.index;
        let timeout = self.ctx.packet_timeout;
        let plugin = self.plugin.as_plugin_mut();
        let ctx = &mut self.ctx;
        let outcome = shared.wait_work(index, min_pkt_cnt, timeout, || {
            plugin.handle_packet_timeout(ctx)
        });
        self.ctx.bitrate = outcome.bitrate;
        self.ctx.confidence = outcome.confidence;
        self.ctx.aborting = outcome.own_aborting;
        outcome
    }

    /// Service a pending restart, if any.
    ///
    /// Returns false when a restart was attempted and failed with both
    /// the new and the previous arguments; the stage then aborts.
    fn process_pending_restart(&mut self) -> bool {
        let Self {
            shared,
            plugin,
            ctx,
            args,
            index,
            ..
        } = self;

        shared
            .service_restart(*index, |request: &RestartRequest| {
                ctx.report
                    .verbose(&format!("restarting plugin {}", ctx.name));
                request
                    .report
                    .verbose(&format!("restarting plugin {}", ctx.name));

                let _ = plugin.as_plugin_mut().stop(ctx);
                ctx.session_packets = 0;
                plugin.as_plugin_mut().reset_context();

                // Redirect diagnostics to the requester for the span of
                // the restart, so that configuration errors reach it.
                let previous_report = std::mem::replace(&mut ctx.report, request.report.clone());

                let success = if request.same_args {
                    match plugin.as_plugin_mut().start(ctx) {
                        Ok(()) => true,
                        Err(e) => {
                            ctx.report.error(&e.to_string());
                            false
                        }
                    }
                } else {
                    match configure_and_start(plugin, ctx, &request.args) {
                        Ok(()) => {
                            *args = request.args.clone();
                            true
                        }
                        Err(e) => {
                            ctx.report.error(&e.to_string());
                            ctx.report.warning(&format!(
                                "failed to restart plugin {}, restarting with previous parameters",
                                ctx.name
                            ));
                            match configure_and_start(plugin, ctx, args) {
                                Ok(()) => true,
                                Err(e) => {
                                    ctx.report.error(&e.to_string());
                                    false
                                }
                            }
                        }
                    }
                };

                ctx.report = previous_report;
                success
            })
            .unwrap_or(true)
    }

    fn input_bitrate(&self) -> (Bitrate, BitrateConfidence) {
        match &self.plugin {
            BoxedPlugin::Input(plugin) => plugin
                .bitrate()
                .unwrap_or((Bitrate::ZERO, BitrateConfidence::Low)),
            _ => (Bitrate::ZERO, BitrateConfidence::Low),
        }
    }

    fn run_input(&mut self) -> bool {
        let mut ok = true;
        loop {
            if !self.process_pending_restart() {
                self.shared.pass_packets(
                    self.index,
                    0,
                    self.ctx.bitrate,
                    self.ctx.confidence,
                    true,
                    true,
                );
                ok = false;
                break;
            }
            let (bitrate, confidence) = self.input_bitrate();

            let outcome = self.wait_work(1);
            if outcome.aborted || outcome.own_aborting {
                // No more packets will come: end of input drains the
                // downstream side while the abort travels backward.
                self.shared
                    .pass_packets(self.index, 0, bitrate, confidence, true, true);
                break;
            }
            if outcome.timeout {
                // Downstream did not release slots in time: end the input.
                self.ctx
                    .report
                    .verbose("packet timeout on input, terminating");
                self.shared
                    .pass_packets(self.index, 0, bitrate, confidence, true, false);
                break;
            }

            let mut produced = 0usize;
            let mut end = false;
            let mut failed = false;
            if outcome.count > 0 {
                // SAFETY: slots outcome.first..+count belong to this
                // stage's window until pass_packets below.
                let (packets, metadata) =
                    unsafe { self.shared.buffer().window(outcome.first, outcome.count) };
                // Recycled slots keep stale metadata from the last lap.
                for meta in metadata.iter_mut() {
                    meta.reset();
                }
                let received = match &mut self.plugin {
                    BoxedPlugin::Input(plugin) => plugin.receive(packets, metadata, &mut self.ctx),
                    _ => unreachable!("input worker hosts an input plugin"),
                };
                match received {
                    Ok(0) => end = true,
                    Ok(n) => {
                        produced = n.min(outcome.count);
                        if n > outcome.count {
                            self.ctx.report.warning(&format!(
                                "input plugin returned {} packets for a window of {}",
                                n, outcome.count
                            ));
                        }
                        let timestamp = self.epoch.elapsed();
                        for meta in metadata[..produced].iter_mut() {
                            if meta.timestamp().is_none() {
                                meta.set_timestamp(timestamp);
                            }
                        }
                    }
                    Err(e) => {
                        self.ctx.report.error(&format!("input error: {e}"));
                        failed = true;
                    }
                }
            }

            self.ctx.session_packets += produced as u64;
            self.ctx.total_packets += produced as u64;

            if failed {
                self.shared
                    .pass_packets(self.index, produced, bitrate, confidence, true, true);
                ok = false;
                break;
            }
            if !self
                .shared
                .pass_packets(self.index, produced, bitrate, confidence, end, false)
            {
                break;
            }
        }
        ok
    }

    fn run_processor(&mut self) -> bool {
        let mut ok = true;
        loop {
            if !self.process_pending_restart() {
                self.shared.pass_packets(
                    self.index,
                    0,
                    self.ctx.bitrate,
                    self.ctx.confidence,
                    true,
                    true,
                );
                ok = false;
                break;
            }

            let outcome = self.wait_work(1);
            let mut aborted = outcome.aborted || outcome.own_aborting;
            let mut end = outcome.input_end;
            let mut pass_count = outcome.count;
            if outcome.timeout {
                aborted = true;
                pass_count = 0;
                ok = false;
            }

            if !aborted && outcome.count > 0 {
                // SAFETY: slots outcome.first..+count belong to this
                // stage's window until pass_packets below.
                let (packets, metadata) =
                    unsafe { self.shared.buffer().window(outcome.first, outcome.count) };
                let plugin = match &mut self.plugin {
                    BoxedPlugin::Processor(plugin) => plugin,
                    _ => unreachable!("processor worker hosts a processor plugin"),
                };
                for i in 0..outcome.count {
                    // Slots dropped by an upstream processor are passed
                    // along but no longer processed.
                    if !metadata[i].is_valid() {
                        continue;
                    }
                    match plugin.process_packet(&mut packets[i], &mut metadata[i], &mut self.ctx) {
                        PacketStatus::Pass => {}
                        PacketStatus::Drop => metadata[i].nullify(),
                        PacketStatus::Null => packets[i] = TsPacket::null_packet(),
                        PacketStatus::End => {
                            pass_count = i;
                            end = true;
                            break;
                        }
                        PacketStatus::Abort => {
                            pass_count = i;
                            aborted = true;
                            ok = false;
                            break;
                        }
                    }
                }
                self.ctx.session_packets += pass_count as u64;
                self.ctx.total_packets += pass_count as u64;
            }

            // An aborting stage stops feeding its successor: raise end
            // of input so the downstream side drains and exits.
            if aborted {
                end = true;
            }

            if !self.shared.pass_packets(
                self.index,
                pass_count,
                outcome.bitrate,
                outcome.confidence,
                end,
                aborted,
            ) {
                break;
            }
        }
        ok
    }

    fn run_output(&mut self) -> bool {
        let mut ok = true;
        loop {
            if !self.process_pending_restart() {
                self.shared.pass_packets(
                    self.index,
                    0,
                    self.ctx.bitrate,
                    self.ctx.confidence,
                    false,
                    true,
                );
                ok = false;
                break;
            }

            let outcome = self.wait_work(1);
            if outcome.own_aborting {
                // set_abort has already notified our predecessor.
                break;
            }
            if outcome.timeout {
                self.shared.pass_packets(
                    self.index,
                    0,
                    outcome.bitrate,
                    outcome.confidence,
                    false,
                    true,
                );
                ok = false;
                break;
            }
            if outcome.count == 0 && outcome.input_end {
                break;
            }

            let mut failed = false;
            if outcome.count > 0 {
                // SAFETY: slots outcome.first..+count belong to this
                // stage's window until pass_packets below.
                let (packets, metadata) =
                    unsafe { self.shared.buffer().window(outcome.first, outcome.count) };
                let plugin = match &mut self.plugin {
                    BoxedPlugin::Output(plugin) => plugin,
                    _ => unreachable!("output worker hosts an output plugin"),
                };
                // Send contiguous runs of slots still holding a packet.
                let mut start = 0;
                while start < outcome.count {
                    if !metadata[start].is_valid() {
                        start += 1;
                        continue;
                    }
                    let mut end_run = start + 1;
                    while end_run < outcome.count && metadata[end_run].is_valid() {
                        end_run += 1;
                    }
                    match plugin.send(
                        &packets[start..end_run],
                        &metadata[start..end_run],
                        &mut self.ctx,
                    ) {
                        Ok(()) => {
                            self.ctx.session_packets += (end_run - start) as u64;
                            self.ctx.total_packets += (end_run - start) as u64;
                        }
                        Err(e) => {
                            self.ctx.report.error(&format!("output error: {e}"));
                            failed = true;
                            break;
                        }
                    }
                    start = end_run;
                }
            }

            if failed {
                self.shared.pass_packets(
                    self.index,
                    0,
                    outcome.bitrate,
                    outcome.confidence,
                    false,
                    true,
                );
                ok = false;
                break;
            }

            // Recycle the slots to the input. This edge never carries
            // end-of-input or abort.
            self.shared.pass_packets(
                self.index,
                outcome.count,
                outcome.bitrate,
                outcome.confidence,
                false,
                false,
            );
            if outcome.input_end {
                break;
            }
        }
        ok
    }
}
