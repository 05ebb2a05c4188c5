//! Pipeline error types.

use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Plugin error.
    #[error("plugin error: {0}")]
    Plugin(#[from] tsflow_plugin::Error),

    /// Invalid pipeline configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Stage index out of range.
    #[error("no stage at index {0}")]
    StageNotFound(usize),

    /// A stage restart did not complete successfully.
    #[error("restart of stage {stage} failed")]
    RestartFailed {
        /// Index of the stage that was restarted.
        stage: usize,
    },

    /// Worker thread could not be spawned.
    #[error("thread spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Pipeline result type.
pub type Result<T> = std::result::Result<T, Error>;
