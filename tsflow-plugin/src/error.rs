//! Plugin error types.

use crate::api::PluginKind;
use thiserror::Error;

/// Plugin error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Argument analysis failed.
    #[error("plugin {plugin}: invalid arguments: {message}")]
    InvalidArguments {
        /// Plugin name.
        plugin: String,
        /// Parser diagnostic.
        message: String,
    },

    /// A plugin with this name is already registered.
    #[error("plugin already registered: {name}")]
    AlreadyRegistered {
        /// Plugin name.
        name: String,
    },

    /// No plugin with this name is registered.
    #[error("plugin not found: {name}")]
    NotFound {
        /// Plugin name.
        name: String,
    },

    /// The named plugin exists but has the wrong kind for its position.
    #[error("plugin {name} has kind {actual}, expected {expected}")]
    KindMismatch {
        /// Plugin name.
        name: String,
        /// Kind required by the chain position.
        expected: PluginKind,
        /// Kind of the registered plugin.
        actual: PluginKind,
    },

    /// Invalid option values.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The plugin could not start.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// I/O error in a plugin operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Plugin result type.
pub type Result<T> = std::result::Result<T, Error>;
