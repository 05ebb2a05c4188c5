//! Plugin event handlers.
//!
//! Plugins may signal application-defined events through their context;
//! the pipeline dispatches them synchronously, on the stage thread, to
//! every matching registered handler. Handlers must not block for long
//! and must not call back into the pipeline's control interfaces.

use std::sync::Arc;
use tsflow_core::Bitrate;

/// Context passed to event handlers.
#[derive(Debug, Clone)]
pub struct EventContext {
    /// Application-defined event code.
    pub event_code: u32,
    /// Display name of the signalling stage.
    pub stage_name: String,
    /// Position of the signalling stage in the chain.
    pub stage_index: usize,
    /// Total number of stages in the chain.
    pub stage_count: usize,
    /// Bitrate last seen by the signalling stage.
    pub bitrate: Bitrate,
    /// Packets handled by the plugin since its last (re)start.
    pub plugin_packets: u64,
    /// Packets handled by the stage since the pipeline started.
    pub total_packets: u64,
}

/// A handler for plugin events.
pub trait EventHandler: Send + Sync {
    /// Called synchronously from the signalling stage's thread.
    fn handle_event(&self, context: &EventContext);
}

impl<F> EventHandler for F
where
    F: Fn(&EventContext) + Send + Sync,
{
    fn handle_event(&self, context: &EventContext) {
        self(context)
    }
}

/// Registry of event handlers, fixed at pipeline start.
#[derive(Default)]
pub struct EventHandlerRegistry {
    handlers: Vec<(Option<u32>, Arc<dyn EventHandler>)>,
}

impl EventHandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    ///
    /// With `filter` set, the handler only receives events with that
    /// exact code; with `None` it receives every event.
    pub fn register(&mut self, filter: Option<u32>, handler: Arc<dyn EventHandler>) {
        self.handlers.push((filter, handler));
    }

    /// Invoke all matching handlers.
    pub fn dispatch(&self, context: &EventContext) {
        for (filter, handler) in &self.handlers {
            if filter.map_or(true, |code| code == context.event_code) {
                handler.handle_event(context);
            }
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
