use anyhow::{Context, Result};
use std::env;
use tracing_subscriber::EnvFilter;

use plant_controller::config;
use plant_controller::content::BuiltinContent;
use plant_controller::controller::Controller;
use plant_controller::hw;
use plant_controller::mqtt::MqttBridge;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "controller.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Hardware ────────────────────────────────────────────────────
    let board = hw::init_board(&cfg).context("failed to initialise board")?;

    // ── MQTT ────────────────────────────────────────────────────────
    let bridge = MqttBridge::new(&cfg.broker);

    Controller::new(bridge, board, BuiltinContent::default(), &cfg)
        .run()
        .await
}
