//! Pipeline construction and supervision.

use crate::error::{Error, Result};
use crate::event::EventHandlerRegistry;
use crate::executor::{StageSummary, StageWorker};
use crate::restart::RestartRequest;
use crate::ring::{RingShared, StageInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tsflow_core::{Bitrate, BitrateConfidence, LogReport, Report};
use tsflow_plugin::{PluginKind, PluginRegistry};

/// Default packet buffer capacity, in packets.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// One plugin of the chain: its registered name and its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Name the plugin is registered under.
    pub name: String,
    /// Argument vector, analyzed against the plugin's options.
    #[serde(default)]
    pub args: Vec<String>,
}

impl PluginSpec {
    /// Specify a plugin without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Specify a plugin with arguments.
    pub fn with_args(name: impl Into<String>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the shared packet buffer, in packets.
    pub buffer_size: usize,
    /// Initial packet timeout applied to every stage.
    ///
    /// Plugins may change their own stage's timeout at any time.
    #[serde(default)]
    pub packet_timeout: Option<Duration>,
    /// Plugins in chain order: one input, any number of processors,
    /// one output.
    pub plugins: Vec<PluginSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            packet_timeout: None,
            plugins: Vec::new(),
        }
    }
}

/// Final accounting of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    /// Per-stage summaries, in chain order.
    pub stages: Vec<StageSummary>,
}

impl PipelineSummary {
    /// True when every stage terminated without error.
    pub fn success(&self) -> bool {
        self.stages.iter().all(|s| s.success)
    }
}

/// A running packet pipeline.
///
/// Construction starts all plugins synchronously, installs the buffer
/// windows, then launches one worker thread per stage. The pipeline
/// runs until the input ends, a stage aborts, or [`abort`](Self::abort)
/// is called; [`join`](Self::join) then collects every worker.
pub struct Pipeline {
    shared: Arc<RingShared>,
    handles: Vec<JoinHandle<StageSummary>>,
}

impl Pipeline {
    /// Build and launch a pipeline.
    ///
    /// Plugin names are resolved against `registry`; the first spec
    /// must name an input plugin, the last an output plugin, all others
    /// processors. Plugins are analyzed, configured and started in
    /// chain order before any worker thread runs; on failure, the
    /// already-started plugins are stopped and the error returned.
    pub fn start(
        config: PipelineConfig,
        registry: &PluginRegistry,
        handlers: EventHandlerRegistry,
    ) -> Result<Pipeline> {
        if config.buffer_size == 0 {
            return Err(Error::InvalidConfig("buffer size must not be zero".into()));
        }
        let n = config.plugins.len();
        if n < 2 {
            return Err(Error::InvalidConfig(
                "a pipeline needs at least an input and an output plugin".into(),
            ));
        }

        let mut plugins = Vec::with_capacity(n);
        for (i, spec) in config.plugins.iter().enumerate() {
            let expected = if i == 0 {
                PluginKind::Input
            } else if i == n - 1 {
                PluginKind::Output
            } else {
                PluginKind::Processor
            };
            plugins.push(registry.create_kind(&spec.name, expected)?);
        }

        let infos = config
            .plugins
            .iter()
            .zip(&plugins)
            .map(|(spec, plugin)| StageInfo {
                name: spec.name.clone(),
                kind: plugin.kind(),
            })
            .collect();
        let shared = Arc::new(RingShared::new(config.buffer_size, infos));
        let handlers = Arc::new(handlers);
        let epoch = Instant::now();

        // Start the plugins synchronously, in chain order.
        let mut workers: Vec<StageWorker> = Vec::with_capacity(n);
        for (i, plugin) in plugins.into_iter().enumerate() {
            let spec = &config.plugins[i];
            let mut worker = StageWorker::new(
                i,
                shared.clone(),
                plugin,
                spec.name.clone(),
                spec.args.clone(),
                Arc::new(LogReport),
                handlers.clone(),
                config.packet_timeout,
                epoch,
            );
            if let Err(e) = worker.startup() {
                warn!(stage = %spec.name, error = %e, "plugin failed to start");
                for started in workers.iter_mut().rev() {
                    started.shutdown();
                }
                return Err(e.into());
            }
            workers.push(worker);
        }

        // Install the initial windows: the input owns the whole buffer,
        // every other stage starts with an empty window right after it.
        shared.init_window(
            0,
            0,
            config.buffer_size,
            false,
            false,
            Bitrate::ZERO,
            BitrateConfidence::Low,
        );
        for i in 1..n {
            shared.init_window(i, 0, 0, false, false, Bitrate::ZERO, BitrateConfidence::Low);
        }

        let mut handles = Vec::with_capacity(n);
        for worker in workers {
            let thread_name = format!("tsflow-{}", worker.name());
            match thread::Builder::new()
                .name(thread_name)
                .spawn(move || worker.run())
            {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Tear down whatever already runs before bailing out.
                    shared.abort_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
        }

        info!(stages = n, buffer = config.buffer_size, "pipeline started");
        Ok(Pipeline { shared, handles })
    }

    /// Number of stages in the chain.
    pub fn stage_count(&self) -> usize {
        self.shared.stage_count()
    }

    /// Display name of a stage.
    pub fn stage_name(&self, index: usize) -> Option<&str> {
        (index < self.shared.stage_count()).then(|| self.shared.stage_name(index))
    }

    /// Request every stage to abort. Returns immediately; use
    /// [`join`](Self::join) to wait for termination.
    pub fn abort(&self) {
        info!("pipeline abort requested");
        self.shared.abort_all();
    }

    /// Request one stage to abort.
    ///
    /// The abort propagates backward through the ring; stages upstream
    /// of the target stop as they observe it. Downstream stages drain
    /// and terminate through their packet timeouts, if any.
    pub fn abort_stage(&self, index: usize) -> Result<()> {
        if index >= self.shared.stage_count() {
            return Err(Error::StageNotFound(index));
        }
        info!(stage = index, "stage abort requested");
        self.shared.set_abort(index);
        Ok(())
    }

    /// Restart one stage in place, without stopping the pipeline.
    ///
    /// With `same_args`, the stage's plugin is stopped and restarted
    /// with its current configuration. Otherwise `args` is analyzed
    /// against the plugin's options; on failure, the stage falls back
    /// to its previous configuration. Diagnostics of the whole
    /// operation go to `report`.
    ///
    /// The call blocks until the stage has serviced the request, or
    /// until a newer restart of the same stage supersedes it.
    pub fn restart_stage(
        &self,
        index: usize,
        args: Vec<String>,
        same_args: bool,
        report: Arc<dyn Report>,
    ) -> Result<()> {
        if index >= self.shared.stage_count() {
            return Err(Error::StageNotFound(index));
        }
        debug!(stage = index, same_args, "stage restart requested");
        let request = Arc::new(RestartRequest::new(args, same_args, report));
        self.shared.install_restart(index, request.clone());
        if request.wait() {
            Ok(())
        } else {
            Err(Error::RestartFailed { stage: index })
        }
    }

    /// Wait for every worker thread and collect the final accounting.
    pub fn join(self) -> PipelineSummary {
        let Pipeline { shared, handles } = self;
        let mut stages = Vec::with_capacity(handles.len());
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(summary) => stages.push(summary),
                Err(_) => stages.push(StageSummary {
                    name: shared.stage_name(i).to_string(),
                    kind: shared.stage_kind(i),
                    packets: 0,
                    success: false,
                }),
            }
        }
        let summary = PipelineSummary { stages };
        info!(success = summary.success(), "pipeline terminated");
        summary
    }
}
