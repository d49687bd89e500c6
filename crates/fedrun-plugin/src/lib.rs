//! `fedrun-plugin`: boundary to the external computation plugin.
//!
//! The plugin is a shared library exporting two C entry points:
//!
//! - `run_plan`: runs one round, pulling examples and polling device
//!   conditions through a table of callbacks, and returns a result record.
//! - `free_run_plan_result`: releases that record; called exactly once.
//!
//! Rust callers see the safe [`ComputationPlugin`] / [`TaskEnvironment`] pair.
//! [`DylibPlugin`] adapts a loaded library to it; everything `unsafe` lives in
//! [`ffi`] and [`dylib`].

pub mod dylib;
pub mod environment;
pub mod error;
pub mod ffi;
pub mod slot;
pub mod types;

pub use dylib::DylibPlugin;
pub use environment::{ExampleSourceError, TaskEnvironment};
pub use error::PluginError;
pub use slot::PluginSlot;
pub use types::{PlanRequest, PlanResult, PlanStatus};

/// A component able to run one round for one client.
///
/// The call blocks until the round is over. `env` is only valid for the
/// duration of the call.
pub trait ComputationPlugin: Send + Sync {
    fn run_plan(
        &self,
        env: &mut dyn TaskEnvironment,
        request: &PlanRequest<'_>,
    ) -> Result<PlanResult, PluginError>;
}
