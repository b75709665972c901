//! Plant controller: samples soil moisture, lights a band indicator, raises
//! a "needs water" alert after a cooldown, and takes pump, buzzer and
//! conversation commands from an MQTT broker.

pub mod backoff;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod content;
pub mod controller;
pub mod hw;
pub mod irrigation;
pub mod moisture;
pub mod mqtt;
pub mod tone;
