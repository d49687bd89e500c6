use thiserror::Error;

/// Failures talking to an upstream health service.
#[derive(Debug, Error)]
pub enum ConditionError {
    /// The service answered a point query with an error.
    #[error("query failed: {0}")]
    QueryFailed(String),
}
