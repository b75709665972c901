//! TOML config loading, environment overrides and validation.
//!
//! Every field has a default, so an absent file is a valid configuration.
//! Broker settings can be overridden from the environment (`MQTT_HOST`,
//! `MQTT_PORT`, `MQTT_USERNAME`, `MQTT_PASSWORD`, `MQTT_CLIENT_ID`,
//! `FEED_PREFIX`), which is where credentials normally come from.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::hw::ads1115::MAX_CHANNEL;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub broker: BrokerConfig,
    pub sampling: SamplingConfig,
    pub pump: PumpConfig,
    pub tone: ToneConfig,
    pub pins: PinConfig,
    pub adc: AdcConfig,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prepended to every feed name.  Defaults to `<username>/feeds/`
    /// (Adafruit IO layout) when a username is set, otherwise empty.
    pub feed_prefix: Option<String>,
    pub keep_alive_sec: u64,
    /// Upper bound on one inbound-message wait in the control loop.
    pub poll_timeout_ms: u64,
    pub connect_timeout_sec: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    pub interval_sec: u64,
    /// Dry time before the "needs water" alert fires.
    pub cooldown_sec: u64,
    /// Raw sensor value that reads as 100%.
    pub full_scale: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PumpConfig {
    pub water_sec: u64,
    /// Pause after the pump stops, before the melody.
    pub settle_sec: u64,
    pub active_low: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToneConfig {
    /// Length of one melody unit (an eighth note).
    pub unit_ms: u64,
    pub water_repeats: u32,
    pub buzzer_repeats: u32,
}

/// BCM pin numbers.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PinConfig {
    pub led_dry: u8,
    pub led_medium: u8,
    pub led_moist: u8,
    pub pump: u8,
    pub buzzer: u8,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdcConfig {
    pub address: u16,
    pub channel: u8,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "io.adafruit.com".to_string(),
            port: 1883,
            client_id: "plant-controller".to_string(),
            username: None,
            password: None,
            feed_prefix: None,
            keep_alive_sec: 30,
            poll_timeout_ms: 100,
            connect_timeout_sec: 10,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_sec: 20,
            cooldown_sec: 40,
            full_scale: 40_000.0,
        }
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            water_sec: 5,
            settle_sec: 2,
            active_low: false,
        }
    }
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            unit_ms: 100,
            water_repeats: 3,
            buzzer_repeats: 2,
        }
    }
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            led_dry: 5,
            led_medium: 6,
            led_moist: 13,
            pump: 17,
            buzzer: 18,
        }
    }
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            address: 0x48,
            channel: 0,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl BrokerConfig {
    pub fn feed_prefix(&self) -> String {
        match (&self.feed_prefix, &self.username) {
            (Some(prefix), _) => prefix.clone(),
            (None, Some(user)) => format!("{user}/feeds/"),
            (None, None) => String::new(),
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_sec)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins usable on the 40-pin header.  0-1 belong to the ID EEPROM.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

/// SDA/SCL of I2C bus 1, where the ADS1115 sits.
const I2C_PINS: [u8; 2] = [2, 3];

/// ADS1115 ADDR-pin strapping options.
const ADS1115_ADDRESSES: std::ops::RangeInclusive<u16> = 0x48..=0x4B;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections.  Reports every violation found, not just the
    /// first one.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_broker(&mut errors);
        self.validate_timing(&mut errors);
        self.validate_pins(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_broker(&self, errors: &mut Vec<String>) {
        let b = &self.broker;
        if b.host.trim().is_empty() {
            errors.push("broker.host is empty".to_string());
        }
        if b.port == 0 {
            errors.push("broker.port must be non-zero".to_string());
        }
        if b.client_id.trim().is_empty() {
            errors.push("broker.client_id is empty".to_string());
        }
        if b.password.is_some() && b.username.is_none() {
            errors.push("broker.password is set without broker.username".to_string());
        }
        if b.keep_alive_sec < 5 {
            errors.push(format!(
                "broker.keep_alive_sec must be at least 5, got {}",
                b.keep_alive_sec
            ));
        }
        if b.poll_timeout_ms == 0 {
            errors.push("broker.poll_timeout_ms must be positive".to_string());
        }
        if b.connect_timeout_sec == 0 {
            errors.push("broker.connect_timeout_sec must be positive".to_string());
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let s = &self.sampling;
        if s.interval_sec == 0 {
            errors.push("sampling.interval_sec must be positive".to_string());
        }
        if s.cooldown_sec == 0 {
            errors.push("sampling.cooldown_sec must be positive".to_string());
        }
        if !(s.full_scale.is_finite() && s.full_scale > 0.0) {
            errors.push(format!(
                "sampling.full_scale must be a positive number, got {}",
                s.full_scale
            ));
        }

        if self.pump.water_sec == 0 {
            errors.push("pump.water_sec must be positive".to_string());
        }
        if self.tone.unit_ms == 0 {
            errors.push("tone.unit_ms must be positive".to_string());
        }

        let r = &self.reconnect;
        if r.initial_backoff_ms == 0 {
            errors.push("reconnect.initial_backoff_ms must be positive".to_string());
        }
        if r.max_backoff_ms < r.initial_backoff_ms {
            errors.push(format!(
                "reconnect.max_backoff_ms ({}) is below initial_backoff_ms ({})",
                r.max_backoff_ms, r.initial_backoff_ms
            ));
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let p = &self.pins;
        let named = [
            ("led_dry", p.led_dry),
            ("led_medium", p.led_medium),
            ("led_moist", p.led_moist),
            ("pump", p.pump),
            ("buzzer", p.buzzer),
        ];

        let mut seen: HashSet<u8> = HashSet::new();
        for (name, pin) in named {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "pins.{name}: {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if I2C_PINS.contains(&pin) {
                errors.push(format!(
                    "pins.{name}: {pin} is reserved for the I2C bus (ADS1115)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!("pins.{name}: {pin} is already used by another output"));
            }
        }

        if !ADS1115_ADDRESSES.contains(&self.adc.address) {
            errors.push(format!(
                "adc.address 0x{:02x} is not an ADS1115 address (0x48-0x4b)",
                self.adc.address
            ));
        }
        if self.adc.channel > MAX_CHANNEL {
            errors.push(format!(
                "adc.channel {} out of range (0-{MAX_CHANNEL})",
                self.adc.channel
            ));
        }
    }

    // -----------------------------------------------------------------------
    // Environment overrides
    // -----------------------------------------------------------------------

    /// Apply broker overrides from `lookup` (normally the process env).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let b = &mut self.broker;
        if let Some(v) = lookup("MQTT_HOST") {
            b.host = v;
        }
        if let Some(v) = lookup("MQTT_PORT") {
            match v.parse() {
                Ok(port) => b.port = port,
                Err(_) => warn!(value = %v, "ignoring unparsable MQTT_PORT"),
            }
        }
        if let Some(v) = lookup("MQTT_CLIENT_ID") {
            b.client_id = v;
        }
        if let Some(v) = lookup("MQTT_USERNAME") {
            b.username = Some(v);
        }
        if let Some(v) = lookup("MQTT_PASSWORD") {
            b.password = Some(v);
        }
        if let Some(v) = lookup("FEED_PREFIX") {
            b.feed_prefix = Some(v);
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Parse a TOML config string (no env overrides, no validation).
pub fn parse(contents: &str) -> Result<Config> {
    Ok(toml::from_str(contents)?)
}

/// Read the config file (defaults if it does not exist), apply environment
/// overrides and validate.
pub fn load(path: &str) -> Result<Config> {
    load_with(path, |key| std::env::var(key).ok())
}

/// [`load`] with the environment lookup supplied by the caller.
fn load_with(path: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        parse(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        info!(path, "config file not found, using defaults");
        Config::default()
    };

    config.apply_overrides(lookup);
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    info!(
        host = %config.broker.host,
        port = config.broker.port,
        feed_prefix = %config.broker.feed_prefix(),
        interval_sec = config.sampling.interval_sec,
        cooldown_sec = config.sampling.cooldown_sec,
        "config loaded"
    );
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
