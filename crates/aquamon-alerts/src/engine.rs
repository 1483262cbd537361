//! [`AlertEngine`] – threshold state machine over incoming readings.
//!
//! Families are evaluated in the fixed [`WarningFamily::CASCADE`] order and
//! only the first breaching family is surfaced for a reading, even when
//! several are out of band at once.
//!
//! | Family | Breach |
//! |---|---|
//! | `phAcid` | `ph < 6.0` |
//! | `phBase` | `ph > 9.0` |
//! | `turbidityHigh` | `turbidity > 80` |
//! | `temperatureHigh` | `temperature > 35` |
//! | `temperatureLow` | `temperature < 15` |
//!
//! A raised warning is *new* (sound, vibration) when its family differs from
//! the one currently surfaced, or when more than the dwell interval has
//! passed since that family last produced a new warning. Otherwise it is a
//! silent update of the same notification.

use std::time::Duration;

use aquamon_types::{SensorReading, WarningFamily};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Thresholds and timings. Every field falls back to its default when absent
/// from the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub ph_acid_below: f64,
    pub ph_base_above: f64,
    pub turbidity_above: f64,
    pub temperature_above: f64,
    pub temperature_below: f64,
    /// Minimum gap between two new warnings of the same family.
    pub dwell_secs: u64,
    /// Lifetime of the "back to normal" notification.
    pub normal_dismiss_secs: u64,
    /// Minimum gap between ongoing-status refreshes.
    pub status_refresh_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            ph_acid_below: 6.0,
            ph_base_above: 9.0,
            turbidity_above: 80.0,
            temperature_above: 35.0,
            temperature_below: 15.0,
            dwell_secs: 30 * 60,
            normal_dismiss_secs: 10,
            status_refresh_secs: 5,
        }
    }
}

impl AlertConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.dwell_secs)
    }

    pub fn normal_dismiss_after(&self) -> Duration {
        Duration::from_secs(self.normal_dismiss_secs)
    }

    pub fn status_refresh(&self) -> Duration {
        Duration::from_secs(self.status_refresh_secs)
    }

    /// The limit a family is compared against.
    pub fn threshold(&self, family: WarningFamily) -> f64 {
        match family {
            WarningFamily::PhAcid => self.ph_acid_below,
            WarningFamily::PhBase => self.ph_base_above,
            WarningFamily::TurbidityHigh => self.turbidity_above,
            WarningFamily::TemperatureHigh => self.temperature_above,
            WarningFamily::TemperatureLow => self.temperature_below,
        }
    }

    fn breaches(&self, family: WarningFamily, value: f64) -> bool {
        let limit = self.threshold(family);
        match family {
            WarningFamily::PhAcid | WarningFamily::TemperatureLow => value < limit,
            WarningFamily::PhBase
            | WarningFamily::TurbidityHigh
            | WarningFamily::TemperatureHigh => value > limit,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// State
// ────────────────────────────────────────────────────────────────────────────

/// Per-family state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FamilyState {
    Normal,
    Active { value: f64, threshold: f64 },
}

/// The currently surfaced warning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveWarning {
    pub family: WarningFamily,
    pub value: f64,
    pub threshold: f64,
    /// Instant of this family's last *new* warning.
    pub last_raised: DateTime<Utc>,
}

/// Warning memory. At most one family is active at a time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarningState {
    surfaced: Option<ActiveWarning>,
}

impl WarningState {
    pub fn family(&self, family: WarningFamily) -> FamilyState {
        match self.surfaced {
            Some(w) if w.family == family => FamilyState::Active {
                value: w.value,
                threshold: w.threshold,
            },
            _ => FamilyState::Normal,
        }
    }

    pub fn active(&self) -> Option<&ActiveWarning> {
        self.surfaced.as_ref()
    }
}

/// Outcome of evaluating one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertDecision {
    Raised {
        family: WarningFamily,
        value: f64,
        threshold: f64,
        is_new: bool,
    },
    Cleared {
        family: WarningFamily,
    },
    StillNormal,
}

// ────────────────────────────────────────────────────────────────────────────
// Engine
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct AlertEngine {
    config: AlertConfig,
    state: WarningState,
}

impl AlertEngine {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            state: WarningState::default(),
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn state(&self) -> &WarningState {
        &self.state
    }

    /// Return every family to `Normal`.
    pub fn reset(&mut self) {
        self.state = WarningState::default();
    }

    /// First family in cascade order that `reading` breaches.
    pub fn first_breach(&self, reading: &SensorReading) -> Option<(WarningFamily, f64)> {
        WarningFamily::CASCADE.into_iter().find_map(|family| {
            let value = reading.channel(family.channel());
            self.config.breaches(family, value).then_some((family, value))
        })
    }

    /// Evaluate `reading` at wall-clock instant `now`.
    ///
    /// Non-finite channels are replaced by their defaults first, so malformed
    /// readings can never raise a warning.
    pub fn evaluate(&mut self, reading: &SensorReading, now: DateTime<Utc>) -> AlertDecision {
        let reading = reading.clone().sanitized();

        let Some((family, value)) = self.first_breach(&reading) else {
            return match self.state.surfaced.take() {
                Some(previous) => {
                    info!(family = ?previous.family, "water quality back within safe bands");
                    AlertDecision::Cleared {
                        family: previous.family,
                    }
                }
                None => AlertDecision::StillNormal,
            };
        };

        let threshold = self.config.threshold(family);
        let dwell = i64::try_from(self.config.dwell_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let is_new = match &self.state.surfaced {
            Some(current) if current.family == family => {
                now.signed_duration_since(current.last_raised) > dwell
            }
            _ => true,
        };

        let last_raised = match (&self.state.surfaced, is_new) {
            (Some(current), false) => current.last_raised,
            _ => now,
        };
        self.state.surfaced = Some(ActiveWarning {
            family,
            value,
            threshold,
            last_raised,
        });

        if is_new {
            info!(family = ?family, value, threshold, "warning raised");
        } else {
            debug!(family = ?family, value, "warning still active");
        }
        AlertDecision::Raised {
            family,
            value,
            threshold,
            is_new,
        }
    }
}
