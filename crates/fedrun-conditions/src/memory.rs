use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::condition::TrainingCondition;

/// Lowest foreground pressure level ("none").
pub const FOREGROUND_NOMINAL: u8 = 0;
/// Highest background level a running round tolerates ("cached").
pub const BACKGROUND_CONTINUE_MAX: u8 = 1;

const ABSENT: u8 = u8::MAX;

/// Which of the two memory-pressure broadcasts a level came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureSource {
    /// Pressure on foreground processes.
    Foreground,
    /// Pressure inside the background container.
    Background,
}

/// Memory pressure from two independently broadcast sub-signals.
///
/// The upstream service only broadcasts non-nominal levels, so a missing
/// level means nominal pressure.
pub struct MemoryPressureCondition {
    foreground: AtomicU8,
    background: AtomicU8,
}

impl MemoryPressureCondition {
    pub fn new() -> Self {
        Self {
            foreground: AtomicU8::new(ABSENT),
            background: AtomicU8::new(ABSENT),
        }
    }

    pub fn on_pressure(&self, source: PressureSource, level: u8) {
        // Levels above u8::MAX - 1 would alias the absent marker.
        let level = level.min(ABSENT - 1);
        match source {
            PressureSource::Foreground if level == FOREGROUND_NOMINAL => {
                // Upstream quirk: after foreground pressure returns to nominal,
                // background levels are only re-sent when non-nominal, so every
                // cached level is dropped here.
                self.foreground.store(ABSENT, Ordering::Release);
                self.background.store(ABSENT, Ordering::Release);
                debug!("foreground pressure nominal, cleared cached levels");
            }
            PressureSource::Foreground => {
                self.foreground.store(level, Ordering::Release);
                debug!(level, "foreground memory pressure");
            }
            PressureSource::Background => {
                self.background.store(level, Ordering::Release);
                debug!(level, "background memory pressure");
            }
        }
    }

    /// Last cached level for `source`, `None` when absent.
    pub fn level(&self, source: PressureSource) -> Option<u8> {
        let cell = match source {
            PressureSource::Foreground => &self.foreground,
            PressureSource::Background => &self.background,
        };
        match cell.load(Ordering::Acquire) {
            ABSENT => None,
            level => Some(level),
        }
    }
}

impl Default for MemoryPressureCondition {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingCondition for MemoryPressureCondition {
    fn name(&self) -> &'static str {
        "memory_pressure"
    }

    fn satisfied_to_start(&self) -> bool {
        self.level(PressureSource::Foreground)
            .map_or(true, |level| level == FOREGROUND_NOMINAL)
    }

    fn satisfied_to_continue(&self) -> bool {
        self.level(PressureSource::Background)
            .map_or(true, |level| level <= BACKGROUND_CONTINUE_MAX)
    }
}
