//! Multi-threaded packet pipeline for tsflow.
//!
//! This crate runs a chain of plugins — one input, any number of
//! processors, one output — as a closed ring of executor stages over a
//! single shared packet buffer:
//!
//! ```text
//! ┌───────┐    ┌───────────┐    ┌───────────┐    ┌────────┐
//! │ Input │───▶│ Processor │───▶│ Processor │───▶│ Output │
//! └───────┘    └───────────┘    └───────────┘    └────────┘
//!     ▲                                               │
//!     └──────────────── free slots ───────────────────┘
//! ```
//!
//! Each stage runs on its own thread and owns a contiguous circular
//! window of the buffer; passing packets to the next stage is a window
//! adjustment under one shared mutex, never a copy. Backpressure,
//! end-of-input and abort conditions travel through the same protocol,
//! and a control thread can restart any single stage in place while
//! the pipeline runs.
//!
//! # Key components
//!
//! - [`Pipeline`] - construction, abort, restart and join
//! - [`PipelineConfig`] / [`PluginSpec`] - chain configuration
//! - [`EventHandlerRegistry`] - synchronous plugin event dispatch
//! - [`PipelineSummary`] / [`StageSummary`] - final accounting
//!
//! # Usage
//!
//! ```no_run
//! use tsflow_pipeline::{EventHandlerRegistry, Pipeline, PipelineConfig, PluginSpec};
//! use tsflow_plugin::PluginRegistry;
//!
//! let mut registry = PluginRegistry::new();
//! tsflow_plugins::register_builtins(&mut registry).unwrap();
//!
//! let config = PipelineConfig {
//!     buffer_size: 1024,
//!     packet_timeout: None,
//!     plugins: vec![
//!         PluginSpec::with_args("null", &["--count", "100000"]),
//!         PluginSpec::new("pass"),
//!         PluginSpec::new("drop"),
//!     ],
//! };
//!
//! let pipeline = Pipeline::start(config, &registry, EventHandlerRegistry::new()).unwrap();
//! let summary = pipeline.join();
//! assert!(summary.success());
//! ```

mod buffer;
mod error;
mod event;
mod executor;
mod pipeline;
mod restart;
mod ring;

pub use error::{Error, Result};
pub use event::{EventContext, EventHandler, EventHandlerRegistry};
pub use executor::StageSummary;
pub use pipeline::{Pipeline, PipelineConfig, PipelineSummary, PluginSpec, DEFAULT_BUFFER_SIZE};
