//! Plugin name registry.

use crate::api::{BoxedPlugin, InputPlugin, OutputPlugin, PluginKind, ProcessorPlugin};
use crate::error::{Error, Result};
use std::collections::HashMap;

type Factory = Box<dyn Fn() -> BoxedPlugin + Send + Sync>;

/// Maps plugin names to factories.
///
/// The pipeline resolves the plugin names of its configuration against
/// a registry when it starts, and again when a stage is restarted with
/// new arguments.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, (PluginKind, Factory)>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an input plugin factory.
    pub fn register_input<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn InputPlugin> + Send + Sync + 'static,
    {
        self.register(
            name,
            PluginKind::Input,
            Box::new(move || BoxedPlugin::Input(factory())),
        )
    }

    /// Register a processor plugin factory.
    pub fn register_processor<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn ProcessorPlugin> + Send + Sync + 'static,
    {
        self.register(
            name,
            PluginKind::Processor,
            Box::new(move || BoxedPlugin::Processor(factory())),
        )
    }

    /// Register an output plugin factory.
    pub fn register_output<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn OutputPlugin> + Send + Sync + 'static,
    {
        self.register(
            name,
            PluginKind::Output,
            Box::new(move || BoxedPlugin::Output(factory())),
        )
    }

    fn register(&mut self, name: &str, kind: PluginKind, factory: Factory) -> Result<()> {
        if self.factories.contains_key(name) {
            return Err(Error::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        self.factories.insert(name.to_string(), (kind, factory));
        Ok(())
    }

    /// Create a new instance of the named plugin.
    pub fn create(&self, name: &str) -> Result<BoxedPlugin> {
        let (_, factory) = self.factories.get(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })?;
        Ok(factory())
    }

    /// Create a new instance, checking the kind expected by the caller.
    pub fn create_kind(&self, name: &str, expected: PluginKind) -> Result<BoxedPlugin> {
        let plugin = self.create(name)?;
        if plugin.kind() != expected {
            return Err(Error::KindMismatch {
                name: name.to_string(),
                expected,
                actual: plugin.kind(),
            });
        }
        Ok(plugin)
    }

    /// Get the kind of a registered plugin.
    pub fn kind(&self, name: &str) -> Option<PluginKind> {
        self.factories.get(name).map(|(kind, _)| *kind)
    }

    /// Check whether a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// List all registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{PacketStatus, Plugin, PluginContext, ProcessorPlugin};
    use tsflow_core::{PacketMetadata, TsPacket};

    struct Nop;

    impl Plugin for Nop {
        fn description(&self) -> &'static str {
            "no-op"
        }

        fn options(&self) -> clap::Command {
            clap::Command::new("nop")
        }
    }

    impl ProcessorPlugin for Nop {
        fn process_packet(
            &mut self,
            _packet: &mut TsPacket,
            _metadata: &mut PacketMetadata,
            _ctx: &mut dyn PluginContext,
        ) -> PacketStatus {
            PacketStatus::Pass
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = PluginRegistry::new();
        registry.register_processor("nop", || Box::new(Nop)).unwrap();

        assert!(registry.contains("nop"));
        assert_eq!(registry.kind("nop"), Some(PluginKind::Processor));

        let plugin = registry.create("nop").unwrap();
        assert_eq!(plugin.kind(), PluginKind::Processor);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = PluginRegistry::new();
        registry.register_processor("nop", || Box::new(Nop)).unwrap();
        let err = registry
            .register_processor("nop", || Box::new(Nop))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered { name } if name == "nop"));
    }

    #[test]
    fn test_unknown_plugin() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.create("ghost"),
            Err(Error::NotFound { .. })
        ));
        assert!(registry.kind("ghost").is_none());
    }

    #[test]
    fn test_kind_mismatch() {
        let mut registry = PluginRegistry::new();
        registry.register_processor("nop", || Box::new(Nop)).unwrap();

        let err = registry.create_kind("nop", PluginKind::Input).unwrap_err();
        assert!(matches!(
            err,
            Error::KindMismatch {
                expected: PluginKind::Input,
                actual: PluginKind::Processor,
                ..
            }
        ));
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = PluginRegistry::new();
        registry.register_processor("zeta", || Box::new(Nop)).unwrap();
        registry.register_processor("alpha", || Box::new(Nop)).unwrap();
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }
}
