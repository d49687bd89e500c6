use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
///
/// Round-level failures never show up here: they are logged and turned into a
/// reschedule. Only plumbing around the engine can fail.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The engine's runtime or thread could not be started.
    #[error("failed to start scheduler engine: {0}")]
    Runtime(#[from] std::io::Error),

    /// The engine has stopped and no longer accepts commands.
    #[error("scheduler engine is not running")]
    EngineStopped,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
