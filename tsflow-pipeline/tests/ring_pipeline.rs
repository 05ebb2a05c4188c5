//! Pipeline ring integration tests.
//!
//! Exercises the executor ring with mock plugins to verify packet
//! accounting, ordering, backpressure and abort propagation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tsflow_core::{PacketMetadata, TsPacket};
use tsflow_pipeline::{EventContext, EventHandlerRegistry, Pipeline, PipelineConfig, PluginSpec};
use tsflow_plugin::{
    InputPlugin, OutputPlugin, PacketStatus, Plugin, PluginContext, PluginRegistry,
    ProcessorPlugin, Result,
};
use tsflow_plugins::register_builtins;

// =============================================================================
// Mock Plugins
// =============================================================================

fn write_sequence(packet: &mut TsPacket, sequence: u64) {
    packet.data_mut()[4..12].copy_from_slice(&sequence.to_le_bytes());
}

fn read_sequence(packet: &TsPacket) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&packet.data()[4..12]);
    u64::from_le_bytes(bytes)
}

/// Input producing `total` null packets tagged with a sequence number.
struct SequenceInput {
    total: u64,
    next: u64,
    produced: Arc<AtomicU64>,
}

impl SequenceInput {
    fn new(total: u64, produced: Arc<AtomicU64>) -> Self {
        Self {
            total,
            next: 0,
            produced,
        }
    }
}

impl Plugin for SequenceInput {
    fn description(&self) -> &'static str {
        "sequence-tagged test input"
    }

    fn options(&self) -> clap::Command {
        clap::Command::new("seq")
    }
}

impl InputPlugin for SequenceInput {
    fn receive(
        &mut self,
        packets: &mut [TsPacket],
        _metadata: &mut [PacketMetadata],
        _ctx: &mut dyn PluginContext,
    ) -> Result<usize> {
        let remaining = (self.total - self.next) as usize;
        let produced = packets.len().min(remaining);
        for packet in packets[..produced].iter_mut() {
            *packet = TsPacket::null_packet();
            write_sequence(packet, self.next);
            self.next += 1;
        }
        self.produced.fetch_add(produced as u64, Ordering::SeqCst);
        Ok(produced)
    }
}

/// Output counting packets and verifying their sequence order.
struct CountingOutput {
    received: Arc<AtomicU64>,
    ordered: Arc<AtomicBool>,
    last_sequence: Option<u64>,
}

impl CountingOutput {
    fn new(received: Arc<AtomicU64>, ordered: Arc<AtomicBool>) -> Self {
        Self {
            received,
            ordered,
            last_sequence: None,
        }
    }
}

impl Plugin for CountingOutput {
    fn description(&self) -> &'static str {
        "counting test output"
    }

    fn options(&self) -> clap::Command {
        clap::Command::new("count")
    }
}

impl OutputPlugin for CountingOutput {
    fn send(
        &mut self,
        packets: &[TsPacket],
        _metadata: &[PacketMetadata],
        _ctx: &mut dyn PluginContext,
    ) -> Result<()> {
        for packet in packets {
            let sequence = read_sequence(packet);
            if let Some(last) = self.last_sequence {
                if sequence <= last {
                    self.ordered.store(false, Ordering::SeqCst);
                }
            }
            self.last_sequence = Some(sequence);
            self.received.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Output sleeping per packet and checking that the input never runs
/// more than one buffer ahead.
struct SlowOutput {
    received: Arc<AtomicU64>,
    produced: Arc<AtomicU64>,
    buffer_size: u64,
    overrun: Arc<AtomicBool>,
}

impl Plugin for SlowOutput {
    fn description(&self) -> &'static str {
        "slow test output"
    }

    fn options(&self) -> clap::Command {
        clap::Command::new("slow")
    }
}

impl OutputPlugin for SlowOutput {
    fn send(
        &mut self,
        packets: &[TsPacket],
        _metadata: &[PacketMetadata],
        _ctx: &mut dyn PluginContext,
    ) -> Result<()> {
        for _ in packets {
            std::thread::sleep(Duration::from_millis(1));
            let received = self.received.fetch_add(1, Ordering::SeqCst) + 1;
            let produced = self.produced.load(Ordering::SeqCst);
            // The input can only be ahead by at most the whole buffer.
            if produced > received + self.buffer_size {
                self.overrun.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

/// Output failing after a fixed number of packets.
struct AbortingOutput {
    received: Arc<AtomicU64>,
    fail_after: u64,
}

impl Plugin for AbortingOutput {
    fn description(&self) -> &'static str {
        "aborting test output"
    }

    fn options(&self) -> clap::Command {
        clap::Command::new("abort")
    }
}

impl OutputPlugin for AbortingOutput {
    fn send(
        &mut self,
        packets: &[TsPacket],
        _metadata: &[PacketMetadata],
        _ctx: &mut dyn PluginContext,
    ) -> Result<()> {
        for _ in packets {
            let received = self.received.fetch_add(1, Ordering::SeqCst) + 1;
            if received >= self.fail_after {
                return Err(std::io::Error::other("simulated output failure").into());
            }
        }
        Ok(())
    }
}

/// Processor dropping packets with an odd sequence number.
struct DropOddProcessor;

impl Plugin for DropOddProcessor {
    fn description(&self) -> &'static str {
        "odd-sequence dropper"
    }

    fn options(&self) -> clap::Command {
        clap::Command::new("drop-odd")
    }
}

impl ProcessorPlugin for DropOddProcessor {
    fn process_packet(
        &mut self,
        packet: &mut TsPacket,
        _metadata: &mut PacketMetadata,
        _ctx: &mut dyn PluginContext,
    ) -> PacketStatus {
        if read_sequence(packet) % 2 == 1 {
            PacketStatus::Drop
        } else {
            PacketStatus::Pass
        }
    }
}

/// Processor signalling one event per packet.
struct SignalProcessor {
    code: u32,
}

impl Plugin for SignalProcessor {
    fn description(&self) -> &'static str {
        "event-signalling processor"
    }

    fn options(&self) -> clap::Command {
        clap::Command::new("signal")
    }
}

impl ProcessorPlugin for SignalProcessor {
    fn process_packet(
        &mut self,
        _packet: &mut TsPacket,
        _metadata: &mut PacketMetadata,
        ctx: &mut dyn PluginContext,
    ) -> PacketStatus {
        ctx.signal_event(self.code);
        PacketStatus::Pass
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn config(buffer_size: usize, plugins: Vec<PluginSpec>) -> PipelineConfig {
    PipelineConfig {
        buffer_size,
        packet_timeout: None,
        plugins,
    }
}

// =============================================================================
// Ring Plumbing
// =============================================================================

#[test]
fn test_ring_plumbing_delivers_every_packet_in_order() {
    let produced = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));
    let ordered = Arc::new(AtomicBool::new(true));

    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry).unwrap();
    {
        let produced = produced.clone();
        registry
            .register_input("seq", move || {
                Box::new(SequenceInput::new(1000, produced.clone()))
            })
            .unwrap();
    }
    {
        let received = received.clone();
        let ordered = ordered.clone();
        registry
            .register_output("count", move || {
                Box::new(CountingOutput::new(received.clone(), ordered.clone()))
            })
            .unwrap();
    }

    let pipeline = Pipeline::start(
        config(
            8,
            vec![
                PluginSpec::new("seq"),
                PluginSpec::new("pass"),
                PluginSpec::new("count"),
            ],
        ),
        &registry,
        EventHandlerRegistry::new(),
    )
    .unwrap();

    let summary = pipeline.join();
    assert!(summary.success());
    assert_eq!(produced.load(Ordering::SeqCst), 1000);
    assert_eq!(received.load(Ordering::SeqCst), 1000);
    assert!(ordered.load(Ordering::SeqCst), "packets arrived out of order");
    assert_eq!(summary.stages.len(), 3);
    assert_eq!(summary.stages[2].packets, 1000);
}

#[test]
fn test_dropped_packets_do_not_reach_the_output() {
    let produced = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));
    let ordered = Arc::new(AtomicBool::new(true));

    let mut registry = PluginRegistry::new();
    {
        let produced = produced.clone();
        registry
            .register_input("seq", move || {
                Box::new(SequenceInput::new(1000, produced.clone()))
            })
            .unwrap();
    }
    registry
        .register_processor("drop-odd", || Box::new(DropOddProcessor))
        .unwrap();
    {
        let received = received.clone();
        let ordered = ordered.clone();
        registry
            .register_output("count", move || {
                Box::new(CountingOutput::new(received.clone(), ordered.clone()))
            })
            .unwrap();
    }

    let pipeline = Pipeline::start(
        config(
            8,
            vec![
                PluginSpec::new("seq"),
                PluginSpec::new("drop-odd"),
                PluginSpec::new("count"),
            ],
        ),
        &registry,
        EventHandlerRegistry::new(),
    )
    .unwrap();

    let summary = pipeline.join();
    assert!(summary.success());
    // Every even-sequence packet arrives, still in order.
    assert_eq!(received.load(Ordering::SeqCst), 500);
    assert!(ordered.load(Ordering::SeqCst));
}

// =============================================================================
// Backpressure
// =============================================================================

#[test]
fn test_backpressure_input_never_overruns_the_output() {
    let produced = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));
    let overrun = Arc::new(AtomicBool::new(false));
    let buffer_size = 8usize;

    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry).unwrap();
    {
        let produced = produced.clone();
        registry
            .register_input("seq", move || {
                Box::new(SequenceInput::new(100, produced.clone()))
            })
            .unwrap();
    }
    {
        let received = received.clone();
        let produced = produced.clone();
        let overrun = overrun.clone();
        registry
            .register_output("slow", move || {
                Box::new(SlowOutput {
                    received: received.clone(),
                    produced: produced.clone(),
                    buffer_size: buffer_size as u64,
                    overrun: overrun.clone(),
                })
            })
            .unwrap();
    }

    let pipeline = Pipeline::start(
        config(
            buffer_size,
            vec![
                PluginSpec::new("seq"),
                PluginSpec::new("pass"),
                PluginSpec::new("slow"),
            ],
        ),
        &registry,
        EventHandlerRegistry::new(),
    )
    .unwrap();

    let summary = pipeline.join();
    assert!(summary.success());
    assert_eq!(received.load(Ordering::SeqCst), 100);
    assert!(
        !overrun.load(Ordering::SeqCst),
        "input ran more than one buffer ahead of the output"
    );
}

// =============================================================================
// Backward Abort
// =============================================================================

#[test]
fn test_output_abort_propagates_back_to_the_input() {
    let received = Arc::new(AtomicU64::new(0));
    let buffer_size = 8u64;

    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry).unwrap();
    {
        let received = received.clone();
        registry
            .register_output("abort50", move || {
                Box::new(AbortingOutput {
                    received: received.clone(),
                    fail_after: 50,
                })
            })
            .unwrap();
    }

    // Unlimited input: only the abort chain can stop it.
    let pipeline = Pipeline::start(
        config(
            buffer_size as usize,
            vec![
                PluginSpec::new("null"),
                PluginSpec::new("pass"),
                PluginSpec::new("pass"),
                PluginSpec::new("abort50"),
            ],
        ),
        &registry,
        EventHandlerRegistry::new(),
    )
    .unwrap();

    let summary = pipeline.join();

    let total = received.load(Ordering::SeqCst);
    assert!(
        (50..=50 + buffer_size).contains(&total),
        "output received {} packets",
        total
    );
    // The failing output is reported as unsuccessful, the other stages
    // terminated cleanly through abort propagation.
    assert!(!summary.success());
    assert!(!summary.stages[3].success);
    assert!(summary.stages[0].success);
}

#[test]
fn test_aborting_the_output_stage_stops_the_whole_ring() {
    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry).unwrap();

    let pipeline = Pipeline::start(
        config(
            16,
            vec![
                PluginSpec::new("null"),
                PluginSpec::new("pass"),
                PluginSpec::new("drop"),
            ],
        ),
        &registry,
        EventHandlerRegistry::new(),
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(20));
    assert!(pipeline.abort_stage(9).is_err());

    // Aborting the output propagates backward through the whole ring:
    // packets keep flowing toward the output until every stage has
    // observed the abort, so no timeout is needed.
    pipeline.abort_stage(2).unwrap();
    let summary = pipeline.join();
    assert_eq!(summary.stages.len(), 3);
}

#[test]
fn test_aborting_the_input_stage_stops_the_whole_ring() {
    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry).unwrap();

    let pipeline = Pipeline::start(
        config(
            16,
            vec![
                PluginSpec::new("null"),
                PluginSpec::new("pass"),
                PluginSpec::new("drop"),
            ],
        ),
        &registry,
        EventHandlerRegistry::new(),
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(20));
    // The abort travels backward from the input while its final pass
    // raises end of input, so the downstream stages drain and join
    // without any packet timeout configured.
    pipeline.abort_stage(0).unwrap();
    let summary = pipeline.join();
    assert_eq!(summary.stages.len(), 3);
}

#[test]
fn test_aborting_a_middle_stage_stops_the_whole_ring() {
    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry).unwrap();

    let pipeline = Pipeline::start(
        config(
            16,
            vec![
                PluginSpec::new("null"),
                PluginSpec::new("pass"),
                PluginSpec::new("pass"),
                PluginSpec::new("drop"),
            ],
        ),
        &registry,
        EventHandlerRegistry::new(),
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(20));
    pipeline.abort_stage(1).unwrap();
    let summary = pipeline.join();
    assert_eq!(summary.stages.len(), 4);
}

#[test]
fn test_external_abort_terminates_an_unlimited_pipeline() {
    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry).unwrap();

    let pipeline = Pipeline::start(
        config(
            16,
            vec![
                PluginSpec::new("null"),
                PluginSpec::new("pass"),
                PluginSpec::new("drop"),
            ],
        ),
        &registry,
        EventHandlerRegistry::new(),
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(20));
    pipeline.abort();
    let summary = pipeline.join();
    assert_eq!(summary.stages.len(), 3);
}

// =============================================================================
// Plugin Events
// =============================================================================

#[test]
fn test_plugin_events_reach_registered_handlers() {
    let produced = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));
    let ordered = Arc::new(AtomicBool::new(true));
    let events = Arc::new(AtomicU64::new(0));
    let filtered_out = Arc::new(AtomicU64::new(0));

    let mut registry = PluginRegistry::new();
    {
        let produced = produced.clone();
        registry
            .register_input("seq", move || {
                Box::new(SequenceInput::new(100, produced.clone()))
            })
            .unwrap();
    }
    registry
        .register_processor("signal", || Box::new(SignalProcessor { code: 42 }))
        .unwrap();
    {
        let received = received.clone();
        let ordered = ordered.clone();
        registry
            .register_output("count", move || {
                Box::new(CountingOutput::new(received.clone(), ordered.clone()))
            })
            .unwrap();
    }

    let mut handlers = EventHandlerRegistry::new();
    {
        let events = events.clone();
        handlers.register(
            Some(42),
            Arc::new(move |context: &EventContext| {
                assert_eq!(context.event_code, 42);
                assert_eq!(context.stage_index, 1);
                events.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
    {
        let filtered_out = filtered_out.clone();
        handlers.register(
            Some(7),
            Arc::new(move |_: &EventContext| {
                filtered_out.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    let pipeline = Pipeline::start(
        config(
            8,
            vec![
                PluginSpec::new("seq"),
                PluginSpec::new("signal"),
                PluginSpec::new("count"),
            ],
        ),
        &registry,
        handlers,
    )
    .unwrap();

    let summary = pipeline.join();
    assert!(summary.success());
    assert_eq!(events.load(Ordering::SeqCst), 100);
    assert_eq!(filtered_out.load(Ordering::SeqCst), 0);
}
