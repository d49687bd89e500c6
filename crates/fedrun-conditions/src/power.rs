use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::condition::TrainingCondition;

/// Battery charge above which discharging is acceptable.
const BATTERY_PERCENT_THRESHOLD: f32 = 90.0;

// Battery status packed into one word so percent and state never tear:
// bits 0..32 percent as f32 bits, bits 32..40 charge state,
// bit 40 "a broadcast arrived".
const BATTERY_KNOWN: u64 = 1 << 40;

const SAVER_UNKNOWN: u8 = 0;
const SAVER_DISABLED: u8 = 1;
const SAVER_ENABLED: u8 = 2;

/// Charge state as reported by the power service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeState {
    Unknown,
    Charging,
    Discharging,
    NotCharging,
    Full,
}

impl ChargeState {
    fn code(self) -> u64 {
        match self {
            Self::Unknown => 0,
            Self::Charging => 1,
            Self::Discharging => 2,
            Self::NotCharging => 3,
            Self::Full => 4,
        }
    }

    fn from_code(code: u64) -> Self {
        match code {
            1 => Self::Charging,
            2 => Self::Discharging,
            3 => Self::NotCharging,
            4 => Self::Full,
            _ => Self::Unknown,
        }
    }

    /// Unknown counts as discharging.
    fn may_be_discharging(self) -> bool {
        matches!(self, Self::Discharging | Self::Unknown)
    }
}

impl fmt::Display for ChargeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Charging => "charging",
            Self::Discharging => "discharging",
            Self::NotCharging => "not_charging",
            Self::Full => "full",
        };
        write!(f, "{s}")
    }
}

/// Battery level, charge state and battery-saver mode.
///
/// Starts unsatisfied: the battery broadcast has no safe default, and the
/// saver flag is assumed on until the power service's availability callback
/// reports otherwise.
pub struct PowerCondition {
    battery: AtomicU64,
    saver: AtomicU8,
}

impl PowerCondition {
    pub fn new() -> Self {
        Self {
            battery: AtomicU64::new(0),
            saver: AtomicU8::new(SAVER_UNKNOWN),
        }
    }

    /// Periodic battery broadcast.
    pub fn on_battery_status(&self, percent: f64, state: ChargeState) {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0) as f32
        } else {
            0.0
        };
        let packed = BATTERY_KNOWN | (state.code() << 32) | u64::from(percent.to_bits());
        self.battery.store(packed, Ordering::Release);
        debug!(percent, %state, "battery status updated");
    }

    /// The power service became available and answered the initial saver
    /// query. `None` means the query failed, so the conservative default stays.
    pub fn on_saver_service_available(&self, enabled: Option<bool>) {
        match enabled {
            Some(enabled) => self.on_saver_changed(enabled),
            None => debug!("battery saver state still unknown"),
        }
    }

    /// Battery-saver change notification.
    pub fn on_saver_changed(&self, enabled: bool) {
        let value = if enabled { SAVER_ENABLED } else { SAVER_DISABLED };
        self.saver.store(value, Ordering::Release);
        debug!(enabled, "battery saver updated");
    }

    /// Last battery broadcast as `(percent, state)`, if any arrived.
    pub fn battery(&self) -> Option<(f32, ChargeState)> {
        let packed = self.battery.load(Ordering::Acquire);
        if packed & BATTERY_KNOWN == 0 {
            return None;
        }
        let percent = f32::from_bits((packed & 0xFFFF_FFFF) as u32);
        let state = ChargeState::from_code((packed >> 32) & 0xFF);
        Some((percent, state))
    }

    fn satisfied(&self) -> bool {
        if self.saver.load(Ordering::Acquire) != SAVER_DISABLED {
            return false;
        }
        match self.battery() {
            Some((percent, state)) => {
                percent > BATTERY_PERCENT_THRESHOLD || !state.may_be_discharging()
            }
            None => false,
        }
    }
}

impl Default for PowerCondition {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingCondition for PowerCondition {
    fn name(&self) -> &'static str {
        "power"
    }

    fn satisfied_to_start(&self) -> bool {
        self.satisfied()
    }

    fn satisfied_to_continue(&self) -> bool {
        self.satisfied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_service_is_not_satisfied() {
        let power = PowerCondition::new();
        assert!(!power.satisfied_to_start());
        assert!(!power.satisfied_to_continue());
    }

    #[test]
    fn saver_off_and_full_battery_discharging_is_satisfied() {
        let power = PowerCondition::new();
        power.on_saver_service_available(Some(false));
        assert!(!power.satisfied_to_start(), "battery still unknown");
        power.on_battery_status(95.0, ChargeState::Discharging);
        assert!(power.satisfied_to_start());
        assert!(power.satisfied_to_continue());
    }

    #[test]
    fn low_battery_needs_a_charger() {
        let power = PowerCondition::new();
        power.on_saver_changed(false);
        power.on_battery_status(40.0, ChargeState::Discharging);
        assert!(!power.satisfied_to_start());
        power.on_battery_status(40.0, ChargeState::Charging);
        assert!(power.satisfied_to_start());
        power.on_battery_status(40.0, ChargeState::Unknown);
        assert!(!power.satisfied_to_start());
    }

    #[test]
    fn threshold_is_exclusive() {
        let power = PowerCondition::new();
        power.on_saver_changed(false);
        power.on_battery_status(90.0, ChargeState::Discharging);
        assert!(!power.satisfied_to_start());
        power.on_battery_status(90.6, ChargeState::Discharging);
        assert!(power.satisfied_to_start());
    }

    #[test]
    fn fractional_charge_above_threshold_is_satisfied() {
        let power = PowerCondition::new();
        power.on_saver_changed(false);
        power.on_battery_status(90.4, ChargeState::Discharging);
        assert!(power.satisfied_to_start());
        assert!(power.satisfied_to_continue());
        power.on_battery_status(89.9, ChargeState::Discharging);
        assert!(!power.satisfied_to_start());
    }

    #[test]
    fn saver_enabled_blocks_even_when_charging() {
        let power = PowerCondition::new();
        power.on_battery_status(100.0, ChargeState::Full);
        power.on_saver_changed(true);
        assert!(!power.satisfied_to_start());
        power.on_saver_changed(false);
        assert!(power.satisfied_to_start());
    }

    #[test]
    fn failed_initial_saver_query_stays_conservative() {
        let power = PowerCondition::new();
        power.on_battery_status(100.0, ChargeState::Full);
        power.on_saver_service_available(None);
        assert!(!power.satisfied_to_start());
    }

    #[test]
    fn battery_readback_is_clamped() {
        let power = PowerCondition::new();
        assert_eq!(power.battery(), None);
        power.on_battery_status(150.0, ChargeState::Full);
        assert_eq!(power.battery(), Some((100.0, ChargeState::Full)));
        power.on_battery_status(f64::NAN, ChargeState::Charging);
        assert_eq!(power.battery(), Some((0.0, ChargeState::Charging)));
        power.on_battery_status(42.5, ChargeState::Discharging);
        assert_eq!(power.battery(), Some((42.5, ChargeState::Discharging)));
    }
}
