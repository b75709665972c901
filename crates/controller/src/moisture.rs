//! Moisture sampling, band classification and the three indicator LEDs.

use std::fmt;

use crate::hw::{AnalogInput, DigitalOutput, SensorError};

/// Below this percentage the soil is dry.
pub const DRY_BELOW: f64 = 40.0;
/// Above this percentage the soil is moist.
pub const MOIST_ABOVE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoistureReading {
    pub raw: u16,
    /// `raw / full_scale * 100`, clamped to `[0, 100]`.
    pub percent: f64,
}

impl MoistureReading {
    pub fn from_raw(raw: u16, full_scale: f64) -> Self {
        let percent = (f64::from(raw) / full_scale * 100.0).clamp(0.0, 100.0);
        Self { raw, percent }
    }

    pub fn band(&self) -> MoistureBand {
        MoistureBand::classify(self.percent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoistureBand {
    Dry,
    Medium,
    Moist,
}

impl MoistureBand {
    /// `< 40` dry, `40..=60` medium, `> 60` moist.
    pub fn classify(percent: f64) -> Self {
        if percent < DRY_BELOW {
            Self::Dry
        } else if percent <= MOIST_ABOVE {
            Self::Medium
        } else {
            Self::Moist
        }
    }
}

impl fmt::Display for MoistureBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dry => write!(f, "dry"),
            Self::Medium => write!(f, "medium"),
            Self::Moist => write!(f, "moist"),
        }
    }
}

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

/// Red / yellow / green LEDs; at most one lit, matching the current band.
pub struct Indicators<O> {
    dry: O,
    medium: O,
    moist: O,
}

impl<O: DigitalOutput> Indicators<O> {
    pub fn new(dry: O, medium: O, moist: O) -> Self {
        Self { dry, medium, moist }
    }

    pub fn apply(&mut self, band: MoistureBand) {
        self.dry.set(band == MoistureBand::Dry);
        self.medium.set(band == MoistureBand::Medium);
        self.moist.set(band == MoistureBand::Moist);
    }

    pub fn all_off(&mut self) {
        self.dry.set(false);
        self.medium.set(false);
        self.moist.set(false);
    }

    /// The band currently shown, if any LED is lit.
    pub fn shown(&self) -> Option<MoistureBand> {
        match (self.dry.is_on(), self.medium.is_on(), self.moist.is_on()) {
            (true, false, false) => Some(MoistureBand::Dry),
            (false, true, false) => Some(MoistureBand::Medium),
            (false, false, true) => Some(MoistureBand::Moist),
            _ => None,
        }
    }

    pub fn lit_count(&self) -> usize {
        [&self.dry, &self.medium, &self.moist]
            .iter()
            .filter(|o| o.is_on())
            .count()
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub struct MoistureMonitor {
    full_scale: f64,
}

impl MoistureMonitor {
    /// `full_scale` is the raw value that reads as 100% (sensor calibration).
    pub fn new(full_scale: f64) -> Self {
        Self { full_scale }
    }

    pub fn sample<A: AnalogInput>(&self, sensor: &mut A) -> Result<MoistureReading, SensorError> {
        let raw = sensor.read_raw()?;
        Ok(MoistureReading::from_raw(raw, self.full_scale))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
