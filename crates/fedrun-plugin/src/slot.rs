use std::path::PathBuf;
use std::sync::Arc;

use tracing::error;

use crate::dylib::DylibPlugin;
use crate::ComputationPlugin;

/// Lazily loaded plugin handle.
///
/// The library is loaded on first use. A failed load is logged once and then
/// remembered, so callers simply see no plugin.
pub enum PluginSlot {
    Unloaded(PathBuf),
    Ready(Arc<dyn ComputationPlugin>),
    Failed,
}

impl PluginSlot {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::Unloaded(path.into())
    }

    /// Slot holding an already constructed plugin.
    pub fn ready(plugin: Arc<dyn ComputationPlugin>) -> Self {
        Self::Ready(plugin)
    }

    pub fn get_or_load(&mut self) -> Option<Arc<dyn ComputationPlugin>> {
        if let Self::Unloaded(path) = self {
            *self = match DylibPlugin::load(path.as_path()) {
                Ok(plugin) => Self::Ready(Arc::new(plugin)),
                Err(e) => {
                    error!(error = %e, "computation plugin unavailable; no rounds will run");
                    Self::Failed
                }
            };
        }
        match self {
            Self::Ready(plugin) => Some(Arc::clone(plugin)),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Debug for PluginSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded(path) => f.debug_tuple("Unloaded").field(path).finish(),
            Self::Ready(_) => f.write_str("Ready"),
            Self::Failed => f.write_str("Failed"),
        }
    }
}
