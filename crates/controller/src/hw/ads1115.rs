//! ADS1115 16-bit ADC over I2C, used as the analog moisture input.
//!
//! Single-ended, PGA ±4.096 V, 128 SPS, single-shot.  The register math is
//! always compiled; the rppal driver only with the `adc` feature.

#![cfg_attr(not(feature = "adc"), allow(dead_code))]

use std::time::Duration;

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

/// OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot),
/// DR=100 (128 SPS), COMP_QUE=11 (comparator off).
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// MUX values for AINx vs GND.
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

pub const MAX_CHANNEL: u8 = 3;

/// ~7.8 ms per conversion at 128 SPS.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Set in the config register once a conversion has finished.
const OS_READY_BIT: u16 = 1 << 15;

/// Largest single-ended result.
pub const FULL_SCALE: u16 = 32767;

fn config_for_channel(channel: u8) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[usize::from(channel)] << MUX_SHIFT)
}

/// Single-ended conversions are non-negative; anything else is bus noise.
fn to_raw(conversion: i16) -> u16 {
    conversion.clamp(0, FULL_SCALE as i16) as u16
}

#[cfg(feature = "adc")]
pub use driver::Ads1115;

#[cfg(feature = "adc")]
mod driver {
    use std::thread;
    use std::time::Duration;

    use rppal::i2c::I2c;

    use super::*;
    use crate::hw::{AnalogInput, SensorError};

    pub struct Ads1115 {
        i2c: I2c,
        channel: u8,
    }

    impl Ads1115 {
        /// Open I2C bus 1 and address the converter at `addr`.
        pub fn new(addr: u16, channel: u8) -> anyhow::Result<Self> {
            anyhow::ensure!(
                channel <= MAX_CHANNEL,
                "ADS1115 channel {channel} out of range (0–{MAX_CHANNEL})"
            );

            let mut i2c = I2c::new()?;
            i2c.set_slave_address(addr)?;

            tracing::info!(
                addr = format_args!("0x{addr:02x}"),
                channel,
                "ads1115 initialised"
            );
            Ok(Self { i2c, channel })
        }

        fn convert(&mut self) -> rppal::i2c::Result<i16> {
            let config = config_for_channel(self.channel);
            self.i2c.block_write(REG_CONFIG, &config.to_be_bytes())?;

            thread::sleep(CONVERSION_WAIT);

            for _ in 0..3 {
                let mut buf = [0u8; 2];
                self.i2c.block_read(REG_CONFIG, &mut buf)?;
                if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                    break;
                }
                thread::sleep(Duration::from_millis(2));
            }

            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONVERSION, &mut buf)?;
            Ok(i16::from_be_bytes(buf))
        }
    }

    impl AnalogInput for Ads1115 {
        fn read_raw(&mut self) -> Result<u16, SensorError> {
            self.convert()
                .map(to_raw)
                .map_err(|e| SensorError::Read(e.to_string()))
        }
    }
}
