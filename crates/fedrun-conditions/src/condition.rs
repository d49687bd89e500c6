/// One device-health signal the scheduler gates rounds on.
///
/// Implementations are updated asynchronously by their upstream service and
/// must answer from cached state without blocking. Missing data has to read
/// as "not satisfied" unless the upstream protocol defines silence as nominal.
pub trait TrainingCondition: Send + Sync {
    /// Stable lowercase identifier used in logs and stats (e.g. `"power"`).
    fn name(&self) -> &'static str;

    /// May a round start now?
    fn satisfied_to_start(&self) -> bool;

    /// May a running round keep going? Polled by the plugin during a round.
    fn satisfied_to_continue(&self) -> bool;
}
