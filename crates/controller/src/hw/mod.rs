//! Hardware seams and the board context the control loop owns.
//!
//! `gpio` wires the indicator LEDs, pump relay and buzzer to Raspberry Pi
//! header pins through rppal; without it, mock outputs log state changes.
//! The moisture input comes from an ADS1115 (`adc`) or the simulator (`sim`).

pub mod ads1115;
#[cfg(feature = "gpio")]
pub mod gpio;
pub mod mock;
#[cfg(feature = "sim")]
pub mod sim;

use anyhow::Result;
use thiserror::Error;
use tracing::warn;

use crate::config::Config;
use crate::moisture::Indicators;
use crate::tone::ToneError;

#[cfg(not(any(feature = "adc", feature = "sim")))]
compile_error!("enable the `adc` or `sim` feature to provide a moisture source");

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A binary output: LED or relay.
pub trait DigitalOutput {
    fn set(&mut self, on: bool);
    fn is_on(&self) -> bool;
}

/// A variable-frequency square-wave output driving a piezo buzzer.
pub trait ToneOutput {
    /// Start (or retune) a tone at `hz`.
    fn tone(&mut self, hz: u32) -> Result<(), ToneError>;
    fn silence(&mut self) -> Result<(), ToneError>;
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("adc read failed: {0}")]
    Read(String),
}

/// Raw analog moisture input.
pub trait AnalogInput {
    fn read_raw(&mut self) -> Result<u16, SensorError>;
}

// ---------------------------------------------------------------------------
// Board context
// ---------------------------------------------------------------------------

/// Every actuator and sensor the controller drives, passed around explicitly.
pub struct Peripherals<O, T, A> {
    pub indicators: Indicators<O>,
    pub pump: O,
    pub buzzer: T,
    pub sensor: A,
}

impl<O: DigitalOutput, T: ToneOutput, A> Peripherals<O, T, A> {
    /// Pump off, indicators dark, buzzer quiet.
    pub fn safe_state(&mut self) {
        self.pump.set(false);
        self.indicators.all_off();
        if let Err(e) = self.buzzer.silence() {
            warn!("failed to silence buzzer: {e}");
        }
    }
}

#[cfg(feature = "gpio")]
pub type BoardOutput = gpio::GpioOutput;
#[cfg(not(feature = "gpio"))]
pub type BoardOutput = mock::MockOutput;

#[cfg(feature = "gpio")]
pub type BoardTone = gpio::PwmBuzzer;
#[cfg(not(feature = "gpio"))]
pub type BoardTone = mock::MockTone;

#[cfg(feature = "adc")]
pub type BoardSensor = ads1115::Ads1115;
#[cfg(all(feature = "sim", not(feature = "adc")))]
pub type BoardSensor = sim::SoilSim;

pub type Board = Peripherals<BoardOutput, BoardTone, BoardSensor>;

/// Bring up every output in its safe state and open the moisture source.
pub fn init_board(cfg: &Config) -> Result<Board> {
    let (indicators, pump, buzzer) = init_outputs(cfg)?;
    let sensor = init_sensor(cfg)?;

    let mut board = Peripherals {
        indicators,
        pump,
        buzzer,
        sensor,
    };
    board.safe_state();
    Ok(board)
}

#[cfg(feature = "gpio")]
fn init_outputs(cfg: &Config) -> Result<(Indicators<BoardOutput>, BoardOutput, BoardTone)> {
    use rppal::gpio::Gpio;

    let gpio = Gpio::new()?;
    let pins = &cfg.pins;
    let indicators = Indicators::new(
        gpio::GpioOutput::new(&gpio, pins.led_dry, false, "led-dry")?,
        gpio::GpioOutput::new(&gpio, pins.led_medium, false, "led-medium")?,
        gpio::GpioOutput::new(&gpio, pins.led_moist, false, "led-moist")?,
    );
    let pump = gpio::GpioOutput::new(&gpio, pins.pump, cfg.pump.active_low, "pump")?;
    let buzzer = gpio::PwmBuzzer::new(&gpio, pins.buzzer)?;
    Ok((indicators, pump, buzzer))
}

#[cfg(not(feature = "gpio"))]
fn init_outputs(cfg: &Config) -> Result<(Indicators<BoardOutput>, BoardOutput, BoardTone)> {
    let pins = &cfg.pins;
    tracing::info!(
        led_dry = pins.led_dry,
        led_medium = pins.led_medium,
        led_moist = pins.led_moist,
        pump = pins.pump,
        buzzer = pins.buzzer,
        "[mock-gpio] outputs initialised (no hardware)"
    );
    let indicators = Indicators::new(
        mock::MockOutput::new("led-dry"),
        mock::MockOutput::new("led-medium"),
        mock::MockOutput::new("led-moist"),
    );
    Ok((indicators, mock::MockOutput::new("pump"), mock::MockTone::default()))
}

#[cfg(feature = "adc")]
fn init_sensor(cfg: &Config) -> Result<BoardSensor> {
    ads1115::Ads1115::new(cfg.adc.address, cfg.adc.channel)
}

#[cfg(all(feature = "sim", not(feature = "adc")))]
fn init_sensor(cfg: &Config) -> Result<BoardSensor> {
    let scenario = std::env::var("SIM_SCENARIO")
        .map(|s| sim::Scenario::from_str_lossy(&s))
        .unwrap_or(sim::Scenario::Drying);
    tracing::info!(%scenario, "using simulated moisture sensor");
    Ok(sim::SoilSim::new(scenario, cfg.sampling.full_scale))
}
