//! Simulated soil moisture probe for running the controller off-hardware.
//!
//! Produces raw readings on the same scale as the configured full-scale
//! constant (higher raw = wetter soil): a mean-reverting random walk with a
//! drying drift, per-read noise and the occasional spike.

use std::fmt;

use super::{AnalogInput, SensorError};

/// Approximate N(0,1) with the Irwin-Hall method (sum of 12 uniforms - 6).
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

/// Simulation profile selected via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts in the medium band and drifts into dry soil.
    Drying,
    /// Hovers mid-band with little noise.
    Stable,
    /// Starts well inside the moist band.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

pub struct SoilSim {
    /// Current "true" moisture in raw units.
    level: f64,
    full_scale: f64,
    /// Where the walk settles, in raw units.
    center: f64,
    drift: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    spike_prob: f32,
}

impl SoilSim {
    pub fn new(scenario: Scenario, full_scale: f64) -> Self {
        // Fractions of full scale.
        let (start, center, drift, walk, reversion, noise, spike_prob) = match scenario {
            Scenario::Drying => (0.55, 0.25, -0.004, 0.01, 0.01, 0.005, 0.02_f32),
            Scenario::Stable => (0.50, 0.50, 0.0, 0.004, 0.05, 0.002, 0.005),
            Scenario::Wet => (0.80, 0.75, -0.001, 0.006, 0.02, 0.003, 0.01),
        };

        Self {
            level: start * full_scale,
            full_scale,
            center: center * full_scale,
            drift: drift * full_scale,
            walk_sigma: walk * full_scale,
            mean_reversion: reversion,
            noise_sigma: noise * full_scale,
            spike_prob,
        }
    }

    fn next(&mut self) -> u16 {
        let pull = self.mean_reversion * (self.center - self.level);
        self.level = (self.level + self.drift + pull + gaussian(0.0, self.walk_sigma))
            .clamp(0.0, self.full_scale);

        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, 0.1 * self.full_scale)
        } else {
            0.0
        };
        let reading = self.level + gaussian(0.0, self.noise_sigma) + spike;
        reading.round().clamp(0.0, f64::from(u16::MAX)) as u16
    }
}

impl AnalogInput for SoilSim {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        Ok(self.next())
    }
}
