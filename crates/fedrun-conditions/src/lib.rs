//! `fedrun-conditions`: device-health admission control.
//!
//! Each [`TrainingCondition`] caches the latest signal from one upstream
//! service (power, network, memory pressure). Signals arrive on arbitrary
//! threads and are stored in atomics; [`DeviceStatusMonitor`] reads them
//! synchronously from the scheduler and ANDs them together.
//!
//! | Condition                 | Satisfied when                                   | Before any signal |
//! |---------------------------|--------------------------------------------------|-------------------|
//! | [`PowerCondition`]        | (battery > 90 % or not discharging) and saver off | not satisfied     |
//! | [`NetworkCondition`]      | default network is not metered                   | not satisfied     |
//! | [`MemoryPressureCondition`] | pressure at nominal levels                     | satisfied         |

pub mod condition;
pub mod error;
pub mod memory;
pub mod monitor;
pub mod network;
pub mod power;

pub use condition::TrainingCondition;
pub use error::ConditionError;
pub use memory::{MemoryPressureCondition, PressureSource};
pub use monitor::{AdmissionSnapshot, DeviceStatusMonitor};
pub use network::{NetworkCondition, NetworkProbe};
pub use power::{ChargeState, PowerCondition};
