use thiserror::Error;

/// The example source backing a round failed mid-iteration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("example source failed: {0}")]
pub struct ExampleSourceError(pub String);

/// Callbacks the plugin uses during a round.
///
/// Implemented by the scheduler for the lifetime of a single `run_plan` call.
pub trait TaskEnvironment {
    /// Next example payload, or `Ok(None)` once the batch is exhausted.
    fn next_example(&mut self) -> Result<Option<Vec<u8>>, ExampleSourceError>;

    /// Whether the device still permits the round to continue.
    fn conditions_satisfied(&mut self) -> bool;

    /// Opaque event published by the plugin for logging.
    fn publish_event(&mut self, event: &[u8]);
}
