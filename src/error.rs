//! Error handling for the render worker runtime.
//!
//! Only genuinely recoverable failures surface as [`RuntimeError`].
//! Resource-lifecycle violations (double acquire, releasing a worker that
//! was never lent out) indicate a lifetime bug in the caller and panic
//! loudly instead of returning an error.

use std::io;

/// Recoverable runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread \"{name}\": {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A task was submitted to a worker whose queue has shut down.
    #[error("task submitted to worker \"{name}\" after shutdown")]
    WorkerShutDown { name: String },

    /// The runtime configuration was changed after the first manager was
    /// constructed.
    #[error("runtime configuration changed after first use")]
    AlreadyConfigured,

    /// The configuration text could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
