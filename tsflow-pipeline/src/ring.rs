//! The executor ring and its window protocol.
//!
//! The N stages of a pipeline form a closed ring over one shared packet
//! buffer. Each stage owns a contiguous circular window of the buffer;
//! the sum of all window sizes is always the buffer capacity, and
//! `(first + count) % capacity` of a stage is always the `first` of its
//! successor. A stage advances by passing packets from the tail of its
//! window to the head of its successor's window.
//!
//! All window state is guarded by a single mutex. Each stage has one
//! condition variable (`to_do`) on which it waits for work; every state
//! change is made under the mutex before the corresponding
//! `notify_one`, so metadata (bitrate, end-of-input, abort) is visible
//! to a stage by the time it wakes.
//!
//! Two flags are monotonic for the lifetime of a run:
//! - `input_end` accumulates forward: once a stage has seen end of
//!   input it never unsees it.
//! - `aborting` accumulates forward (a stage stops when its successor
//!   aborts) and propagates backward (an aborting stage notifies its
//!   predecessor).
//!
//! The output→input edge is special: it recycles free slots and never
//! carries `input_end` or `aborting`.

use crate::buffer::PacketBuffer;
use crate::restart::RestartRequest;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tsflow_core::{Bitrate, BitrateConfidence};
use tsflow_plugin::PluginKind;

/// Immutable identity of a stage.
pub(crate) struct StageInfo {
    pub(crate) name: String,
    pub(crate) kind: PluginKind,
}

/// Mutable per-stage state, guarded by the ring mutex.
struct StageState {
    /// Slot index of the start of this stage's window.
    first: usize,
    /// Number of slots in this stage's window.
    count: usize,
    /// No more packets will arrive from upstream.
    input_end: bool,
    /// This stage has decided to stop.
    aborting: bool,
    /// Latest bitrate propagated to this stage.
    bitrate: Bitrate,
    /// Confidence of `bitrate`.
    confidence: BitrateConfidence,
    /// Pending restart request, if any.
    restart: Option<Arc<RestartRequest>>,
}

/// Result of a [`RingShared::wait_work`] call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WaitOutcome {
    /// First slot of the returned contiguous window.
    pub(crate) first: usize,
    /// Number of returned slots (0 on timeout).
    pub(crate) count: usize,
    /// Latest bitrate propagated to the stage.
    pub(crate) bitrate: Bitrate,
    /// Confidence of `bitrate`.
    pub(crate) confidence: BitrateConfidence,
    /// True when no more packets will arrive *and* the returned count
    /// covers the whole remaining window.
    pub(crate) input_end: bool,
    /// The successor stage is aborting (always false for the output
    /// stage: the output→input edge is not a data edge).
    pub(crate) aborted: bool,
    /// The wait timed out and the plugin declined to keep waiting.
    pub(crate) timeout: bool,
    /// This stage itself has been asked to abort.
    pub(crate) own_aborting: bool,
}

/// Shared state of the executor ring.
pub(crate) struct RingShared {
    buffer: PacketBuffer,
    stages: Vec<StageInfo>,
    state: Mutex<Vec<StageState>>,
    to_do: Vec<Condvar>,
}

impl RingShared {
    /// Create the ring with empty windows.
    ///
    /// Windows are installed with [`init_window`](Self::init_window)
    /// before any worker thread starts.
    pub(crate) fn new(capacity: usize, stages: Vec<StageInfo>) -> Self {
        let n = stages.len();
        let state = (0..n)
            .map(|_| StageState {
                first: 0,
                count: 0,
                input_end: false,
                aborting: false,
                bitrate: Bitrate::ZERO,
                confidence: BitrateConfidence::Low,
                restart: None,
            })
            .collect();
        Self {
            buffer: PacketBuffer::new(capacity),
            stages,
            state: Mutex::new(state),
            to_do: (0..n).map(|_| Condvar::new()).collect(),
        }
    }

    pub(crate) fn buffer(&self) -> &PacketBuffer {
        &self.buffer
    }

    pub(crate) fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub(crate) fn stage_name(&self, index: usize) -> &str {
        &self.stages[index].name
    }

    pub(crate) fn stage_kind(&self, index: usize) -> PluginKind {
        self.stages[index].kind
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.stages.len()
    }

    fn prev(&self, index: usize) -> usize {
        (index + self.stages.len() - 1) % self.stages.len()
    }

    /// Install the initial window of a stage.
    ///
    /// Called once per stage, before any worker starts. The input stage
    /// gets the whole buffer; every other stage gets an empty window
    /// positioned right after its predecessor's.
    pub(crate) fn init_window(
        &self,
        index: usize,
        first: usize,
        count: usize,
        input_end: bool,
        aborting: bool,
        bitrate: Bitrate,
        confidence: BitrateConfidence,
    ) {
        let mut state = self.state.lock();
        let stage = &mut state[index];
        stage.first = first;
        stage.count = count;
        stage.input_end = input_end;
        stage.aborting = aborting;
        stage.bitrate = bitrate;
        stage.confidence = confidence;
    }

    /// Wait until stage `index` has work, or a termination condition.
    ///
    /// Blocks until `count >= min_pkt_cnt`, end of input, an abort of
    /// this stage, a successor abort (for non-output stages: the
    /// output→input edge is not a data edge, so the input's abort is
    /// not a wake-up reason for the output), or — when `timeout` is
    /// set — the timeout elapses and `on_timeout` (the plugin's
    /// timeout handler, called with the ring mutex held) returns
    /// false.
    ///
    /// At most the contiguous head of the window is returned: if the
    /// window wraps around the buffer, the head alone is returned when
    /// it satisfies `min_pkt_cnt`, otherwise the full window count is
    /// reported and the caller must cope with the wrap by asking again.
    pub(crate) fn wait_work(
        &self,
        index: usize,
        min_pkt_cnt: usize,
        timeout: Option<Duration>,
        mut on_timeout: impl FnMut() -> bool,
    ) -> WaitOutcome {
        let capacity = self.buffer.capacity();
        let mut min = min_pkt_cnt;
        if min > capacity {
            debug!(
                stage = %self.stages[index].name,
                requested = min_pkt_cnt,
                capacity,
                "request for more packets than the buffer holds, clamping"
            );
            min = capacity;
        }

        let next = self.next(index);
        let is_output = self.stages[index].kind == PluginKind::Output;

        let mut state = self.state.lock();
        let mut timed_out = false;

        while state[index].count < min
            && !state[index].input_end
            && !timed_out
            && !state[index].aborting
            && (is_output || !state[next].aborting)
        {
            match timeout {
                None => self.to_do[index].wait(&mut state),
                Some(duration) => {
                    let result = self.to_do[index].wait_for(&mut state, duration);
                    timed_out = result.timed_out() && !on_timeout();
                }
            }
        }

        let stage = &state[index];
        let count = if timed_out {
            0
        } else if stage.first + min <= capacity {
            // Up to the wrap point; this satisfies the requested minimum.
            stage.count.min(capacity - stage.first)
        } else {
            // The minimum does not fit contiguously before the wrap.
            stage.count
        };

        WaitOutcome {
            first: stage.first,
            count,
            bitrate: stage.bitrate,
            confidence: stage.confidence,
            input_end: stage.input_end && count == stage.count,
            aborted: !is_output && state[next].aborting,
            timeout: timed_out,
            own_aborting: state[index].aborting,
        }
    }

    /// Hand `count` processed packets from stage `index` to its
    /// successor and propagate metadata and termination flags.
    ///
    /// Returns false when the stage shall stop looping.
    pub(crate) fn pass_packets(
        &self,
        index: usize,
        count: usize,
        bitrate: Bitrate,
        confidence: BitrateConfidence,
        input_end: bool,
        aborted: bool,
    ) -> bool {
        let capacity = self.buffer.capacity();
        let next = self.next(index);
        let prev = self.prev(index);
        let is_output = self.stages[index].kind == PluginKind::Output;
        let mut aborted = aborted;

        let mut state = self.state.lock();
        assert!(
            count <= state[index].count,
            "stage {} passes {} packets but owns only {}",
            self.stages[index].name,
            count,
            state[index].count,
        );

        // Remove the passed packets from the head of our window and
        // append them to the tail of the successor's window.
        state[index].first = (state[index].first + count) % capacity;
        state[index].count -= count;
        state[next].count += count;

        // Propagate bitrate and end of input to the successor.
        state[next].bitrate = bitrate;
        state[next].confidence = confidence;
        state[next].input_end = state[next].input_end || input_end;

        debug_assert_eq!(
            state.iter().map(|s| s.count).sum::<usize>(),
            capacity,
            "stage windows must cover the whole buffer"
        );

        // Wake the successor when there is new data or end of input.
        if count > 0 || input_end {
            self.to_do[next].notify_one();
        }

        // A stage stops as soon as its successor aborts, except across
        // the output→input edge which carries no data.
        if !is_output {
            aborted = aborted || state[next].aborting;
        }

        // Propagate abort conditions backward.
        if aborted {
            state[index].aborting = true;
            self.to_do[prev].notify_one();
        }

        !input_end && !aborted
    }

    /// Put stage `index` in the abort state and wake it and its
    /// predecessor.
    pub(crate) fn set_abort(&self, index: usize) {
        let mut state = self.state.lock();
        state[index].aborting = true;
        self.to_do[index].notify_one();
        self.to_do[self.prev(index)].notify_one();
    }

    /// Put every stage in the abort state and wake all of them.
    pub(crate) fn abort_all(&self) {
        let mut state = self.state.lock();
        for stage in state.iter_mut() {
            stage.aborting = true;
        }
        for to_do in &self.to_do {
            to_do.notify_one();
        }
    }

    /// Install a restart request, superseding any pending one.
    pub(crate) fn install_restart(&self, index: usize, request: Arc<RestartRequest>) {
        // Ring mutex first, then the request mutex inside complete().
        let mut state = self.state.lock();
        if let Some(old) = state[index].restart.take() {
            old.report
                .error("restart interrupted by another concurrent restart");
            old.complete(false);
        }
        state[index].restart = Some(request);
        self.to_do[index].notify_one();
    }

    /// Run `service` on the pending restart of stage `index`, if any,
    /// with the ring mutex held for the whole operation.
    ///
    /// The pending slot is cleared and the request completed before the
    /// mutex is released. Returns the restart success, or `None` when
    /// nothing was pending.
    pub(crate) fn service_restart(
        &self,
        index: usize,
        service: impl FnOnce(&RestartRequest) -> bool,
    ) -> Option<bool> {
        let mut state = self.state.lock();
        let request = state[index].restart.clone()?;
        let success = service(&request);
        state[index].restart = None;
        request.complete(success);
        Some(success)
    }

    #[cfg(test)]
    pub(crate) fn window_of(&self, index: usize) -> (usize, usize) {
        let state = self.state.lock();
        (state[index].first, state[index].count)
    }

    #[cfg(test)]
    pub(crate) fn is_aborting(&self, index: usize) -> bool {
        self.state.lock()[index].aborting
    }
}
