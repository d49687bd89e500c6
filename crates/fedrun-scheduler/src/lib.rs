//! `fedrun-scheduler`: recurring, admission-gated rounds per client.
//!
//! # Overview
//!
//! A [`Scheduler`] keeps one [`ClientSession`] per configured client and a
//! delay queue holding each session's next attempt. An attempt checks the
//! device gate, asks storage for a cursor over the client's recent examples,
//! runs the plugin, and always posts the next attempt.
//!
//! The [`SchedulerEngine`] is the single execution sequence that owns the
//! scheduler and the storage manager; everything else talks to it through an
//! [`EngineHandle`].
//!
//! # Retry delays
//!
//! | Round outcome                    | Next delay                          |
//! |----------------------------------|-------------------------------------|
//! | gate denied / no data / failure  | default window                      |
//! | `Contributed`, `RejectedByServer`| server delay, raised to the floor   |

pub mod engine;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod settings;

pub use engine::{EngineCommand, EngineHandle, SchedulerEngine, TableRegistry};
pub use error::{Result, SchedulerError};
pub use scheduler::{Scheduler, SchedulerSnapshot, SchedulerStats};
pub use session::{ClientSession, RoundOutcome};
pub use settings::{RetryPolicy, SchedulerSettings};
