use thiserror::Error;

#[derive(Debug, Error)]
pub enum FedrunError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid client definition ({name}): {reason}")]
    InvalidClient { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, FedrunError>;
