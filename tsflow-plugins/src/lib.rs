//! Built-in plugins for the tsflow packet pipeline.
//!
//! - [`NullInput`] (`null`) - generates null packets, optionally a
//!   fixed number of them.
//! - [`PassProcessor`] (`pass`) - passes every packet unchanged.
//! - [`DropOutput`] (`drop`) - discards every packet.
//! - [`BitrateMonitor`] (`bitrate_monitor`) - monitors the bitrate of
//!   the TS or of a PID set against an allowed range, with alarms,
//!   periodic reports and packet labelling.

mod drop;
mod monitor;
mod null;
mod pass;

pub use crate::drop::DropOutput;
pub use monitor::BitrateMonitor;
pub use null::NullInput;
pub use pass::PassProcessor;

use tsflow_plugin::PluginRegistry;

/// Register every built-in plugin under its canonical name.
pub fn register_builtins(registry: &mut PluginRegistry) -> tsflow_plugin::Result<()> {
    registry.register_input("null", || Box::new(NullInput::new()))?;
    registry.register_processor("pass", || Box::new(PassProcessor::new()))?;
    registry.register_output("drop", || Box::new(DropOutput::new()))?;
    registry.register_processor("bitrate_monitor", || Box::new(BitrateMonitor::new()))?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use tsflow_plugin::PluginKind;

    #[test]
    fn test_register_builtins() {
        let mut registry = PluginRegistry::new();
        register_builtins(&mut registry).unwrap();

        assert_eq!(registry.kind("null"), Some(PluginKind::Input));
        assert_eq!(registry.kind("pass"), Some(PluginKind::Processor));
        assert_eq!(registry.kind("drop"), Some(PluginKind::Output));
        assert_eq!(registry.kind("bitrate_monitor"), Some(PluginKind::Processor));
    }

    #[test]
    fn test_register_twice_fails() {
        let mut registry = PluginRegistry::new();
        register_builtins(&mut registry).unwrap();
        assert!(register_builtins(&mut registry).is_err());
    }
}
