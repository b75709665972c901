//! rppal-backed outputs on the Raspberry Pi header.

use anyhow::Result;
use rppal::gpio::{Gpio, OutputPin};
use tracing::{debug, info};

use super::{DigitalOutput, ToneOutput};
use crate::tone::ToneError;

/// Square wave duty cycle for the piezo.
const BUZZER_DUTY: f64 = 0.5;

// ---------------------------------------------------------------------------
// LEDs and pump relay
// ---------------------------------------------------------------------------

pub struct GpioOutput {
    pin: OutputPin,
    active_low: bool, // many relay boards are active-low
    on: bool,
    name: &'static str,
}

impl GpioOutput {
    /// Claim BCM pin `bcm` as an output, driven OFF.
    pub fn new(gpio: &Gpio, bcm: u8, active_low: bool, name: &'static str) -> Result<Self> {
        let pin = gpio.get(bcm)?.into_output();
        let mut out = Self {
            pin,
            active_low,
            on: false,
            name,
        };
        out.drive(false);

        info!(name, gpio = bcm, active_low, "output ready");
        Ok(out)
    }

    fn drive(&mut self, on: bool) {
        // active-low: LOW = ON, HIGH = OFF
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        self.on = on;
    }
}

impl DigitalOutput for GpioOutput {
    fn set(&mut self, on: bool) {
        if self.on != on {
            debug!(name = self.name, "set {}", if on { "ON" } else { "OFF" });
        }
        self.drive(on);
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

// ---------------------------------------------------------------------------
// Buzzer (software PWM)
// ---------------------------------------------------------------------------

pub struct PwmBuzzer {
    pin: OutputPin,
}

impl PwmBuzzer {
    pub fn new(gpio: &Gpio, bcm: u8) -> Result<Self> {
        let mut pin = gpio.get(bcm)?.into_output();
        pin.set_low();
        info!(gpio = bcm, "buzzer ready");
        Ok(Self { pin })
    }
}

impl ToneOutput for PwmBuzzer {
    fn tone(&mut self, hz: u32) -> Result<(), ToneError> {
        self.pin
            .set_pwm_frequency(f64::from(hz), BUZZER_DUTY)
            .map_err(|e| ToneError::Output(e.to_string()))
    }

    fn silence(&mut self) -> Result<(), ToneError> {
        self.pin
            .clear_pwm()
            .map_err(|e| ToneError::Output(e.to_string()))?;
        self.pin.set_low();
        Ok(())
    }
}
