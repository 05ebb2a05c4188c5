//! Bitrate monitor processor.
//!
//! Monitors the bitrate of the whole TS or of a set of PIDs over a
//! sliding window of one-second periods. When the bitrate leaves the
//! allowed range, an alarm is reported and an optional external
//! command is run; packet labels mark the state and its transitions.

use clap::{Arg, ArgAction, Command};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tsflow_core::{Bitrate, LabelSet, PacketMetadata, TsPacket, PID_MAX, PKT_SIZE_BITS};
use tsflow_plugin::{Error, PacketStatus, Plugin, PluginContext, ProcessorPlugin, Result};

const DEFAULT_MIN_BITRATE: u64 = 10;
const DEFAULT_MAX_BITRATE: u64 = 0xFFFF_FFFF;
const DEFAULT_WINDOW_SECONDS: u16 = 5;

/// Position of the current bitrate relative to the allowed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeStatus {
    Lower,
    InRange,
    Greater,
}

/// What was received during approximately one second.
#[derive(Debug, Clone, Default)]
struct Period {
    /// Actual duration of the period.
    duration: Duration,
    /// Total packets observed.
    packets: u64,
    /// Non-null packets observed.
    non_null: u64,
}

impl Period {
    fn clear(&mut self) {
        *self = Period::default();
    }
}

type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Processor plugin monitoring the TS or PID bitrate.
pub struct BitrateMonitor {
    // Options.
    full_ts: bool,
    summary: bool,
    first_pid: u16,
    pids: Vec<bool>,
    min_bitrate: Bitrate,
    max_bitrate: Bitrate,
    periodic_bitrate: u64,
    periodic_command: u64,
    window_size: usize,
    alarm_command: Option<String>,
    alarm_prefix: String,
    alarm_target: String,
    labels_below: LabelSet,
    labels_normal: LabelSet,
    labels_above: LabelSet,
    labels_go_below: LabelSet,
    labels_go_normal: LabelSet,
    labels_go_above: LabelSet,

    // Working data.
    clock: Clock,
    bitrate_countdown: i64,
    command_countdown: i64,
    last_status: RangeStatus,
    last_second: Option<Instant>,
    startup: bool,
    periods_index: usize,
    periods: Vec<Period>,
    labels_next: LabelSet,
    stats: tsflow_core::RunningStats,
    net_stats: tsflow_core::RunningStats,
}

impl BitrateMonitor {
    /// Create an unconfigured monitor.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Instant::now))
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            full_ts: true,
            summary: false,
            first_pid: PID_MAX,
            pids: Vec::new(),
            min_bitrate: Bitrate::new(DEFAULT_MIN_BITRATE),
            max_bitrate: Bitrate::new(DEFAULT_MAX_BITRATE),
            periodic_bitrate: 0,
            periodic_command: 0,
            window_size: DEFAULT_WINDOW_SECONDS as usize,
            alarm_command: None,
            alarm_prefix: String::new(),
            alarm_target: String::new(),
            labels_below: LabelSet::EMPTY,
            labels_normal: LabelSet::EMPTY,
            labels_above: LabelSet::EMPTY,
            labels_go_below: LabelSet::EMPTY,
            labels_go_normal: LabelSet::EMPTY,
            labels_go_above: LabelSet::EMPTY,
            clock,
            bitrate_countdown: 0,
            command_countdown: 0,
            last_status: RangeStatus::InRange,
            last_second: None,
            startup: true,
            periods_index: 0,
            periods: Vec::new(),
            labels_next: LabelSet::EMPTY,
            stats: tsflow_core::RunningStats::new(),
            net_stats: tsflow_core::RunningStats::new(),
        }
    }

    fn monitored(&self, pid: u16) -> bool {
        self.full_ts || self.pids.get(pid as usize).copied().unwrap_or(false)
    }

    /// Close the current one-second period when its time is up, then
    /// compute the bitrate over the window.
    fn tick(&mut self, now: Instant, ctx: &mut dyn PluginContext) {
        if self.periods.is_empty() {
            return;
        }
        let Some(last) = self.last_second else {
            self.last_second = Some(now);
            return;
        };
        let since = now.saturating_duration_since(last);
        if since >= Duration::from_secs(1) {
            // Exact duration of the period that just ended.
            self.periods[self.periods_index].duration = since;
            self.last_second = Some(now);

            // No computation until the window has filled once, to avoid
            // bogus values at startup.
            if !self.startup {
                self.compute_bitrate(ctx);
            }

            self.periods_index = (self.periods_index + 1) % self.periods.len();
            self.periods[self.periods_index].clear();
            if self.startup {
                self.startup = self.periods_index != 0;
            }
        }
    }

    fn compute_bitrate(&mut self, ctx: &mut dyn PluginContext) {
        let mut duration_us: u128 = 0;
        let mut packets: u64 = 0;
        let mut non_null: u64 = 0;
        for period in &self.periods {
            // Microseconds: nanoseconds overflow too easily, seconds
            // are too coarse.
            duration_us += period.duration.as_micros();
            packets += period.packets;
            non_null += period.non_null;
        }

        let (bitrate, net_bitrate) = if duration_us > 0 {
            (
                Bitrate::new(
                    ((packets as u128 * PKT_SIZE_BITS as u128 * 1_000_000) / duration_us) as u64,
                ),
                Bitrate::new(
                    ((non_null as u128 * PKT_SIZE_BITS as u128 * 1_000_000) / duration_us) as u64,
                ),
            )
        } else {
            (Bitrate::ZERO, Bitrate::ZERO)
        };

        if self.summary {
            self.stats.feed(bitrate.bits_per_second());
            self.net_stats.feed(net_bitrate.bits_per_second());
        }

        let (new_status, status_word) = if bitrate < self.min_bitrate {
            (RangeStatus::Lower, "lower")
        } else if bitrate > self.max_bitrate {
            (RangeStatus::Greater, "greater")
        } else {
            (RangeStatus::InRange, "normal")
        };

        if self.periodic_bitrate > 0 {
            self.bitrate_countdown -= 1;
            if self.bitrate_countdown <= 0 {
                self.bitrate_countdown = self.periodic_bitrate as i64;
                if self.full_ts {
                    ctx.report().info(&format!(
                        "{} bitrate: {}, net bitrate: {}",
                        self.alarm_prefix, bitrate, net_bitrate
                    ));
                } else {
                    ctx.report()
                        .info(&format!("{} bitrate: {}", self.alarm_prefix, bitrate));
                }
            }
        }

        let mut run_command = false;
        if self.periodic_command > 0 {
            self.command_countdown -= 1;
            if self.command_countdown <= 0 {
                self.command_countdown = self.periodic_command as i64;
                run_command = true;
            }
        }

        let state_change = new_status != self.last_status;
        if state_change || run_command {
            let mut message = format!("{} bitrate ({})", self.alarm_prefix, bitrate);
            if state_change {
                match new_status {
                    RangeStatus::Lower => {
                        message.push_str(&format!(
                            " is lower than allowed minimum ({})",
                            self.min_bitrate
                        ));
                        self.labels_next |= self.labels_go_below;
                    }
                    RangeStatus::InRange => {
                        message.push_str(&format!(
                            " is back in allowed range ({}-{})",
                            self.min_bitrate.bits_per_second(),
                            self.max_bitrate
                        ));
                        self.labels_next |= self.labels_go_normal;
                    }
                    RangeStatus::Greater => {
                        message.push_str(&format!(
                            " is greater than allowed maximum ({})",
                            self.max_bitrate
                        ));
                        self.labels_next |= self.labels_go_above;
                    }
                }
                ctx.report().warning(&message);
            }

            if let Some(command) = self.alarm_command.clone() {
                self.run_alarm_command(&command, &message, status_word, bitrate, net_bitrate, ctx);
            }

            self.last_status = new_status;
        }
    }

    /// Launch the alarm command asynchronously; completion is not
    /// awaited. Argument order: message, target, state, bitrate, min,
    /// max, net bitrate.
    fn run_alarm_command(
        &self,
        command: &str,
        message: &str,
        status: &str,
        bitrate: Bitrate,
        net_bitrate: Bitrate,
        ctx: &mut dyn PluginContext,
    ) {
        let result = std::process::Command::new(command)
            .arg(message)
            .arg(&self.alarm_target)
            .arg(status)
            .arg(bitrate.bits_per_second().to_string())
            .arg(self.min_bitrate.bits_per_second().to_string())
            .arg(self.max_bitrate.bits_per_second().to_string())
            .arg(net_bitrate.bits_per_second().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn();
        if let Err(e) = result {
            ctx.report()
                .warning(&format!("cannot run alarm command {}: {}", command, e));
        }
    }

    fn label_values(matches: &clap::ArgMatches, option: &str) -> LabelSet {
        matches
            .get_many::<u8>(option)
            .map(|values| LabelSet::from_labels(values.map(|v| *v as usize)))
            .unwrap_or(LabelSet::EMPTY)
    }

    fn label_option(name: &'static str, help: &'static str) -> Arg {
        Arg::new(name)
            .long(name)
            .value_name("label")
            .help(help)
            .action(ArgAction::Append)
            .value_parser(clap::value_parser!(u8).range(0..=31))
    }
}

impl Default for BitrateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for BitrateMonitor {
    fn description(&self) -> &'static str {
        "Monitor bitrate for TS or a given set of PIDs"
    }

    fn options(&self) -> Command {
        Command::new("bitrate_monitor")
            .arg(
                Arg::new("pid")
                    .long("pid")
                    .value_name("pid")
                    .help(
                        "PID to monitor. May be repeated; with several PIDs the tested \
                         bitrate is their global bitrate. Default: the full TS.",
                    )
                    .action(ArgAction::Append)
                    .value_parser(clap::value_parser!(u16).range(0..=PID_MAX as i64)),
            )
            .arg(
                Arg::new("alarm-command")
                    .long("alarm-command")
                    .short('a')
                    .value_name("command")
                    .help(
                        "Command to run when the bitrate goes out of range or back to \
                         normal. Receives: message, \"ts\" or first PID, state \
                         (lower/greater/normal), bitrate, min, max, net bitrate.",
                    )
                    .action(ArgAction::Set),
            )
            .arg(
                Arg::new("time-interval")
                    .long("time-interval")
                    .short('t')
                    .value_name("seconds")
                    .help("Time window (in seconds) used to compute the bitrate.")
                    .action(ArgAction::Set)
                    .value_parser(clap::value_parser!(u16).range(1..)),
            )
            .arg(
                Arg::new("min")
                    .long("min")
                    .value_name("bitrate")
                    .help("Minimum allowed bitrate (bits/s).")
                    .action(ArgAction::Set)
                    .value_parser(clap::value_parser!(u64)),
            )
            .arg(
                Arg::new("max")
                    .long("max")
                    .value_name("bitrate")
                    .help("Maximum allowed bitrate (bits/s).")
                    .action(ArgAction::Set)
                    .value_parser(clap::value_parser!(u64)),
            )
            .arg(
                Arg::new("periodic-bitrate")
                    .long("periodic-bitrate")
                    .short('p')
                    .value_name("seconds")
                    .help("Always report the bitrate at this interval, even in range.")
                    .action(ArgAction::Set)
                    .value_parser(clap::value_parser!(u64).range(1..)),
            )
            .arg(
                Arg::new("periodic-command")
                    .long("periodic-command")
                    .value_name("seconds")
                    .help("Run the alarm command at this interval, even in range.")
                    .action(ArgAction::Set)
                    .value_parser(clap::value_parser!(u64).range(1..)),
            )
            .arg(Self::label_option(
                "set-label-below",
                "Set this label on all packets while the bitrate is below normal.",
            ))
            .arg(Self::label_option(
                "set-label-normal",
                "Set this label on all packets while the bitrate is normal.",
            ))
            .arg(Self::label_option(
                "set-label-above",
                "Set this label on all packets while the bitrate is above normal.",
            ))
            .arg(Self::label_option(
                "set-label-go-below",
                "Set this label on one packet when the bitrate goes below normal.",
            ))
            .arg(Self::label_option(
                "set-label-go-normal",
                "Set this label on one packet when the bitrate goes back to normal.",
            ))
            .arg(Self::label_option(
                "set-label-go-above",
                "Set this label on one packet when the bitrate goes above normal.",
            ))
            .arg(
                Arg::new("summary")
                    .long("summary")
                    .short('s')
                    .help("Display a final summary of bitrate statistics.")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("tag")
                    .long("tag")
                    .value_name("string")
                    .help("Message tag to display in alarms.")
                    .action(ArgAction::Set),
            )
    }

    fn configure(&mut self, matches: &clap::ArgMatches, ctx: &mut dyn PluginContext) -> Result<()> {
        let pid_values: Vec<u16> = matches
            .get_many::<u16>("pid")
            .map(|values| values.copied().collect())
            .unwrap_or_default();
        self.full_ts = pid_values.is_empty();
        self.first_pid = pid_values.first().copied().unwrap_or(PID_MAX);
        self.pids = vec![false; PID_MAX as usize + 1];
        for pid in &pid_values {
            self.pids[*pid as usize] = true;
        }

        self.summary = matches.get_flag("summary");
        self.alarm_command = matches.get_one::<String>("alarm-command").cloned();
        self.window_size = matches
            .get_one::<u16>("time-interval")
            .copied()
            .unwrap_or(DEFAULT_WINDOW_SECONDS) as usize;
        self.min_bitrate = Bitrate::new(
            matches
                .get_one::<u64>("min")
                .copied()
                .unwrap_or(DEFAULT_MIN_BITRATE),
        );
        self.max_bitrate = Bitrate::new(
            matches
                .get_one::<u64>("max")
                .copied()
                .unwrap_or(DEFAULT_MAX_BITRATE),
        );
        self.periodic_bitrate = matches
            .get_one::<u64>("periodic-bitrate")
            .copied()
            .unwrap_or(0);
        self.periodic_command = matches
            .get_one::<u64>("periodic-command")
            .copied()
            .unwrap_or(0);
        self.labels_below = Self::label_values(matches, "set-label-below");
        self.labels_normal = Self::label_values(matches, "set-label-normal");
        self.labels_above = Self::label_values(matches, "set-label-above");
        self.labels_go_below = Self::label_values(matches, "set-label-go-below");
        self.labels_go_normal = Self::label_values(matches, "set-label-go-normal");
        self.labels_go_above = Self::label_values(matches, "set-label-go-above");

        if self.min_bitrate > self.max_bitrate {
            return Err(Error::Config(format!(
                "bad parameters, bitrate min ({}) > max ({})",
                self.min_bitrate, self.max_bitrate
            )));
        }
        if self.periodic_command > 0 && self.alarm_command.is_none() {
            ctx.report()
                .warning("no --alarm-command set, --periodic-command ignored");
            self.periodic_command = 0;
        }

        let tag = matches.get_one::<String>("tag").cloned().unwrap_or_default();
        self.alarm_prefix = if tag.is_empty() {
            String::new()
        } else {
            format!("{}: ", tag)
        };
        if self.full_ts {
            self.alarm_prefix.push_str("TS");
            self.alarm_target = "ts".to_string();
        } else {
            self.alarm_prefix
                .push_str(&format!("PID 0x{:X} ({})", self.first_pid, self.first_pid));
            self.alarm_target = self.first_pid.to_string();
        }

        Ok(())
    }

    fn start(&mut self, ctx: &mut dyn PluginContext) -> Result<()> {
        self.periods = vec![Period::default(); self.window_size.max(1)];
        self.periods_index = 0;
        self.labels_next = LabelSet::EMPTY;
        self.bitrate_countdown = self.periodic_bitrate as i64;
        self.command_countdown = self.periodic_command as i64;
        self.last_status = RangeStatus::InRange;
        self.last_second = Some((self.clock)());
        self.startup = true;
        self.stats.reset();
        self.net_stats.reset();

        // The windowing logic must tick even when the stream is idle.
        ctx.set_packet_timeout(Some(Duration::from_secs(1)));

        tracing::debug!(
            window = self.window_size,
            min = self.min_bitrate.bits_per_second(),
            max = self.max_bitrate.bits_per_second(),
            "bitrate monitor started"
        );
        Ok(())
    }

    fn stop(&mut self, ctx: &mut dyn PluginContext) -> Result<()> {
        if self.summary {
            let mean = Bitrate::new(self.stats.mean().unwrap_or(0));
            if self.full_ts {
                let net_mean = Bitrate::new(self.net_stats.mean().unwrap_or(0));
                ctx.report().info(&format!(
                    "{} average bitrate: {}, average net bitrate: {}",
                    self.alarm_prefix, mean, net_mean
                ));
            } else {
                ctx.report()
                    .info(&format!("{} average bitrate: {}", self.alarm_prefix, mean));
            }
        }
        Ok(())
    }

    fn reset_context(&mut self) {
        self.periods.clear();
        self.periods_index = 0;
        self.labels_next = LabelSet::EMPTY;
        self.last_second = None;
        self.last_status = RangeStatus::InRange;
        self.startup = true;
        self.stats.reset();
        self.net_stats.reset();
    }

    fn handle_packet_timeout(&mut self, ctx: &mut dyn PluginContext) -> bool {
        let now = (self.clock)();
        self.tick(now, ctx);
        // Keep waiting, an idle upstream is not an error.
        true
    }
}

impl ProcessorPlugin for BitrateMonitor {
    fn process_packet(
        &mut self,
        packet: &mut TsPacket,
        metadata: &mut PacketMetadata,
        ctx: &mut dyn PluginContext,
    ) -> PacketStatus {
        if !self.periods.is_empty() && self.monitored(packet.pid()) {
            let period = &mut self.periods[self.periods_index];
            period.packets += 1;
            if !packet.is_null() {
                period.non_null += 1;
            }
        }

        let now = (self.clock)();
        self.tick(now, ctx);

        // Transition labels go on exactly one packet.
        metadata.set_labels(self.labels_next);
        self.labels_next = LabelSet::EMPTY;

        // State labels go on every packet while in state.
        match self.last_status {
            RangeStatus::Lower => metadata.set_labels(self.labels_below),
            RangeStatus::InRange => metadata.set_labels(self.labels_normal),
            RangeStatus::Greater => metadata.set_labels(self.labels_above),
        }

        PacketStatus::Pass
    }
}
