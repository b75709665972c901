//! In-memory outputs for development without hardware, and for tests.
//! State changes are logged the way the real drivers would switch pins.

use tracing::{debug, trace};

use super::{AnalogInput, DigitalOutput, SensorError, ToneOutput};
use crate::tone::ToneError;

/// Digital output that remembers its level and every transition.
#[derive(Debug, Clone)]
pub struct MockOutput {
    name: &'static str,
    on: bool,
    /// Levels written that changed the state, oldest first.
    pub history: Vec<bool>,
}

impl MockOutput {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            on: false,
            history: Vec::new(),
        }
    }
}

impl DigitalOutput for MockOutput {
    fn set(&mut self, on: bool) {
        if self.on != on {
            debug!(
                "[mock-gpio] {} set {}",
                self.name,
                if on { "ON" } else { "OFF" }
            );
            self.history.push(on);
        }
        self.on = on;
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToneCall {
    Tone(u32),
    Silence,
}

/// Buzzer stand-in recording each call.
#[derive(Debug, Default)]
pub struct MockTone {
    pub calls: Vec<ToneCall>,
    sounding: Option<u32>,
}

impl MockTone {
    pub fn is_sounding(&self) -> bool {
        self.sounding.is_some()
    }

    /// Frequencies played, in order.
    pub fn tones(&self) -> impl Iterator<Item = u32> + '_ {
        self.calls.iter().filter_map(|c| match c {
            ToneCall::Tone(hz) => Some(*hz),
            ToneCall::Silence => None,
        })
    }
}

impl ToneOutput for MockTone {
    fn tone(&mut self, hz: u32) -> Result<(), ToneError> {
        trace!(hz, "[mock-gpio] buzzer tone");
        self.sounding = Some(hz);
        self.calls.push(ToneCall::Tone(hz));
        Ok(())
    }

    fn silence(&mut self) -> Result<(), ToneError> {
        self.sounding = None;
        self.calls.push(ToneCall::Silence);
        Ok(())
    }
}

/// Analog input returning a settable value, or an error when `None`.
#[derive(Debug, Clone, Copy)]
pub struct FixedSensor(pub Option<u16>);

impl AnalogInput for FixedSensor {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        self.0
            .ok_or_else(|| SensorError::Read("no reading configured".to_string()))
    }
}
