//! `fedrun-core`: configuration, shared types and the top-level error for the
//! fedrun round scheduler.

pub mod config;
pub mod error;
pub mod types;

pub use config::FedrunConfig;
pub use error::{FedrunError, Result};
pub use types::ClientConfig;
