//! The control loop.
//!
//! One task does everything: each [`Controller::step`] services the broker
//! for at most the poll timeout, runs any command it received to completion,
//! then takes a moisture sample if the sampling interval has elapsed.
//! Watering and melodies sleep inside the step, so while they run no
//! messages are read and no samples are taken.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::bridge::{Bridge, Feed, FeedMessage, TransportFault};
use crate::commands::{BuzzerCommand, ConversationCommand, PumpCommand};
use crate::config::Config;
use crate::content::ContentSource;
use crate::hw::{AnalogInput, DigitalOutput, Peripherals, ToneOutput};
use crate::irrigation::{Alert, IrrigationMachine};
use crate::moisture::{MoistureMonitor, MoistureReading};
use crate::tone::{self, MELODY};

const ALERT_TEXT: &str = "I need water please";

/// Durations and repeat counts, resolved from config once.
#[derive(Debug, Clone)]
pub struct Timing {
    pub sampling_interval: Duration,
    pub cooldown: Duration,
    pub water_for: Duration,
    pub settle_for: Duration,
    pub tone_unit: Duration,
    pub water_repeats: u32,
    pub buzzer_repeats: u32,
}

impl Timing {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            sampling_interval: Duration::from_secs(cfg.sampling.interval_sec),
            cooldown: Duration::from_secs(cfg.sampling.cooldown_sec),
            water_for: Duration::from_secs(cfg.pump.water_sec),
            settle_for: Duration::from_secs(cfg.pump.settle_sec),
            tone_unit: Duration::from_millis(cfg.tone.unit_ms),
            water_repeats: cfg.tone.water_repeats,
            buzzer_repeats: cfg.tone.buzzer_repeats,
        }
    }
}

#[derive(Debug, Serialize)]
struct AlertMsg<'a> {
    ts: i64,
    message: &'a str,
    percent: f64,
    dry_for_sec: u64,
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub struct Controller<B, O, T, A, C> {
    bridge: B,
    hw: Peripherals<O, T, A>,
    monitor: MoistureMonitor,
    machine: IrrigationMachine,
    content: C,
    timing: Timing,
    backoff: Backoff,
    last_sample: Instant,
}

impl<B, O, T, A, C> Controller<B, O, T, A, C>
where
    B: Bridge,
    O: DigitalOutput,
    T: ToneOutput,
    A: AnalogInput,
    C: ContentSource,
{
    pub fn new(bridge: B, hw: Peripherals<O, T, A>, content: C, cfg: &Config) -> Self {
        let timing = Timing::from_config(cfg);
        Self {
            bridge,
            hw,
            monitor: MoistureMonitor::new(cfg.sampling.full_scale),
            machine: IrrigationMachine::new(timing.cooldown),
            content,
            backoff: Backoff::new(
                Duration::from_millis(cfg.reconnect.initial_backoff_ms),
                Duration::from_millis(cfg.reconnect.max_backoff_ms),
            ),
            timing,
            last_sample: Instant::now(),
        }
    }

    /// Put the outputs in a safe state, subscribe to the control feeds and
    /// take the first sample so an indicator is lit from the start.
    pub async fn startup(&mut self) -> Result<(), TransportFault> {
        self.hw.safe_state();
        for feed in Feed::CONTROL {
            self.bridge.subscribe(feed).await?;
        }

        info!(
            sampling_sec = self.timing.sampling_interval.as_secs(),
            cooldown_sec = self.timing.cooldown.as_secs(),
            "controller started"
        );

        let now = Instant::now();
        self.last_sample = now;
        self.sample_tick(now).await;
        Ok(())
    }

    /// Run until Ctrl-C, then switch everything off.
    pub async fn run(mut self) -> Result<()> {
        self.startup()
            .await
            .context("failed to subscribe to control feeds")?;

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                () = self.step() => {}
            }
        }

        self.hw.safe_state();
        Ok(())
    }

    /// One loop iteration.
    pub async fn step(&mut self) {
        match self.bridge.service().await {
            Ok(Some(msg)) => {
                self.backoff.reset();
                self.dispatch(msg).await;
            }
            Ok(None) => self.backoff.reset(),
            Err(fault) => {
                // No sampling until the session is back.
                self.recover(fault).await;
                return;
            }
        }

        let now = Instant::now();
        if now.saturating_duration_since(self.last_sample) >= self.timing.sampling_interval {
            self.last_sample = now;
            self.sample_tick(now).await;
        }
    }

    async fn recover(&mut self, fault: TransportFault) {
        let delay = self.backoff.next_delay();
        error!(
            delay_ms = delay.as_millis() as u64,
            "{fault}; reconnecting"
        );
        sleep(delay).await;

        match self.bridge.reconnect().await {
            Ok(()) => info!("messaging session restored"),
            Err(e) => error!("reconnect failed: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Sampling
    // -----------------------------------------------------------------------

    async fn sample_tick(&mut self, now: Instant) {
        let reading = match self.monitor.sample(&mut self.hw.sensor) {
            Ok(r) => r,
            Err(e) => {
                error!("moisture sample failed: {e}");
                return;
            }
        };

        let band = reading.band();
        self.hw.indicators.apply(band);
        info!(
            raw = reading.raw,
            percent = format!("{:.1}", reading.percent),
            %band,
            "moisture sampled"
        );

        self.publish(Feed::Moisture, reading.percent.to_string()).await;

        if let Some(alert) = self.machine.update(band, now) {
            self.raise_alert(&reading, alert).await;
        }
    }

    async fn raise_alert(&mut self, reading: &MoistureReading, alert: Alert) {
        warn!(dry_for_sec = alert.dry_for.as_secs(), "{ALERT_TEXT}");

        let msg = AlertMsg {
            ts: now_unix(),
            message: ALERT_TEXT,
            percent: reading.percent,
            dry_for_sec: alert.dry_for.as_secs(),
        };
        match serde_json::to_string(&msg) {
            Ok(payload) => self.publish(Feed::Alert, payload).await,
            Err(e) => error!("failed to encode alert: {e}"),
        }
    }

    async fn publish(&mut self, feed: Feed, payload: String) {
        match self.bridge.publish(feed, payload).await {
            Ok(()) => debug!(%feed, "published"),
            Err(e) => error!(%feed, "publish failed: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn dispatch(&mut self, msg: FeedMessage) {
        info!(feed = %msg.feed, payload = %msg.payload, "message received");

        match msg.feed {
            Feed::Pump => match PumpCommand::parse(&msg.payload) {
                Ok(PumpCommand::WaterCycle) => self.water_cycle().await,
                Ok(PumpCommand::Off) => self.pump_off(),
                Err(e) => warn!("{e}"),
            },
            Feed::Buzzer => match BuzzerCommand::parse(&msg.payload) {
                Ok(BuzzerCommand::Sing) => self.sing(self.timing.buzzer_repeats).await,
                Ok(BuzzerCommand::PumpOff) => self.pump_off(),
                Err(e) => warn!("{e}"),
            },
            Feed::Conversation => self.converse(&msg.payload).await,
            Feed::Moisture | Feed::Alert | Feed::Status => {
                debug!(feed = %msg.feed, "ignoring message on outbound feed");
            }
        }
    }

    /// Pump on, wait, pump off, let the water settle, then the melody.
    async fn water_cycle(&mut self) {
        info!(water_sec = self.timing.water_for.as_secs(), "watering");
        self.hw.pump.set(true);
        sleep(self.timing.water_for).await;
        self.hw.pump.set(false);
        info!("watering done");

        sleep(self.timing.settle_for).await;
        self.sing(self.timing.water_repeats).await;
    }

    fn pump_off(&mut self) {
        self.hw.pump.set(false);
        info!("pump off");
    }

    async fn sing(&mut self, repeats: u32) {
        if let Err(e) =
            tone::play_sequence(&mut self.hw.buzzer, &MELODY, repeats, self.timing.tone_unit).await
        {
            error!("melody aborted: {e}");
        }
    }

    async fn converse(&mut self, payload: &str) {
        let reply = match ConversationCommand::parse(payload) {
            Some(ConversationCommand::Fact) => self.content.fact(),
            Some(ConversationCommand::Joke) => self.content.joke(),
            Some(ConversationCommand::Recipe) => self.content.recipe(),
            Some(ConversationCommand::Neutral) => {
                debug!("button back to neutral");
                return;
            }
            None => {
                debug!(payload, "no reply for conversation message");
                return;
            }
        };

        self.publish(Feed::Conversation, reply).await;
        info!("conversation reply published");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::scripted::{BridgeCall, ScriptedBridge};
    use crate::hw::mock::{FixedSensor, MockOutput, MockTone};
    use crate::moisture::{Indicators, MoistureBand};
    use tokio::time::advance;

    const MELODY_NOTES: usize = 24;

    struct Canned;

    impl ContentSource for Canned {
        fn fact(&mut self) -> String {
            "a fact".to_string()
        }
        fn joke(&mut self) -> String {
            "a joke".to_string()
        }
        fn recipe(&mut self) -> String {
            "a recipe".to_string()
        }
    }

    type TestController = Controller<ScriptedBridge, MockOutput, MockTone, FixedSensor, Canned>;

    fn controller(raw: Option<u16>) -> TestController {
        let hw = Peripherals {
            indicators: Indicators::new(
                MockOutput::new("led-dry"),
                MockOutput::new("led-medium"),
                MockOutput::new("led-moist"),
            ),
            pump: MockOutput::new("pump"),
            buzzer: MockTone::default(),
            sensor: FixedSensor(raw),
        };
        Controller::new(ScriptedBridge::default(), hw, Canned, &Config::default())
    }

    const INTERVAL: Duration = Duration::from_secs(20);

    // -- Startup ------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn startup_subscribes_control_feeds() {
        let mut c = controller(Some(0));
        c.hw.pump.set(true);
        c.startup().await.unwrap();

        assert_eq!(
            c.bridge.calls,
            vec![
                BridgeCall::Subscribe(Feed::Pump),
                BridgeCall::Subscribe(Feed::Conversation),
                BridgeCall::Subscribe(Feed::Buzzer),
                BridgeCall::Publish(Feed::Moisture, "0".to_string()),
            ]
        );
        assert!(!c.hw.pump.is_on());
        assert!(!c.hw.buzzer.is_sounding());
    }

    #[tokio::test(start_paused = true)]
    async fn startup_lights_one_indicator_immediately() {
        let mut c = controller(Some(30_000));
        c.startup().await.unwrap();

        assert_eq!(c.hw.indicators.lit_count(), 1);
        assert_eq!(c.hw.indicators.shown(), Some(MoistureBand::Moist));
        assert_eq!(c.bridge.published(Feed::Moisture), vec!["75"]);

        // The regular cadence starts from the startup sample.
        advance(INTERVAL - Duration::from_secs(1)).await;
        c.step().await;
        assert_eq!(c.bridge.published(Feed::Moisture).len(), 1);
        advance(Duration::from_secs(1)).await;
        c.step().await;
        assert_eq!(c.bridge.published(Feed::Moisture).len(), 2);
    }

    // -- Pump feed ----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn pump_zero_waters_then_plays_three_times() {
        let mut c = controller(Some(30_000));
        c.bridge.push_message(Feed::Pump, "0");

        let start = Instant::now();
        c.step().await;

        assert_eq!(c.hw.pump.history, vec![true, false]);
        assert!(!c.hw.pump.is_on());
        assert_eq!(c.hw.buzzer.tones().count(), 3 * MELODY_NOTES);
        assert!(!c.hw.buzzer.is_sounding());
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn pump_one_stops_pump_without_tone() {
        let mut c = controller(Some(30_000));
        c.hw.pump.set(true);
        c.bridge.push_message(Feed::Pump, "1");

        c.step().await;

        assert!(!c.hw.pump.is_on());
        assert!(c.hw.buzzer.calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_pump_payload_changes_nothing() {
        let mut c = controller(Some(30_000));
        c.bridge.push_message(Feed::Pump, "2");

        c.step().await;

        assert!(c.hw.pump.history.is_empty());
        assert!(c.hw.buzzer.calls.is_empty());
    }

    // -- Buzzer feed --------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn buzzer_zero_plays_twice_without_pump() {
        let mut c = controller(Some(30_000));
        c.bridge.push_message(Feed::Buzzer, "0");

        c.step().await;

        assert_eq!(c.hw.buzzer.tones().count(), 2 * MELODY_NOTES);
        assert!(!c.hw.buzzer.is_sounding());
        assert!(c.hw.pump.history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn buzzer_one_stops_pump() {
        let mut c = controller(Some(30_000));
        c.hw.pump.set(true);
        c.bridge.push_message(Feed::Buzzer, "1");

        c.step().await;

        assert!(!c.hw.pump.is_on());
        assert!(c.hw.buzzer.calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_buzzer_payload_changes_nothing() {
        let mut c = controller(Some(30_000));
        c.bridge.push_message(Feed::Buzzer, "play");

        c.step().await;

        assert!(c.hw.pump.history.is_empty());
        assert!(c.hw.buzzer.calls.is_empty());
    }

    // -- Conversation feed --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn conversation_buttons_get_replies() {
        let mut c = controller(Some(30_000));
        c.bridge.push_message(Feed::Conversation, "Give me a fact!");
        c.bridge.push_message(Feed::Conversation, "Tell me a joke!");
        c.bridge.push_message(Feed::Conversation, "Recipe Ideas");
        for _ in 0..3 {
            c.step().await;
        }

        assert_eq!(
            c.bridge.published(Feed::Conversation),
            vec!["a fact", "a joke", "a recipe"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn conversation_neutral_and_echoes_are_quiet() {
        let mut c = controller(Some(30_000));
        c.bridge.push_message(Feed::Conversation, "---------");
        c.bridge.push_message(Feed::Conversation, "a fact");
        c.step().await;
        c.step().await;

        assert!(c.bridge.published(Feed::Conversation).is_empty());
    }

    // -- Sampling -----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn no_sample_before_interval() {
        let mut c = controller(Some(30_000));
        c.step().await;
        advance(INTERVAL - Duration::from_secs(1)).await;
        c.step().await;

        assert!(c.bridge.published(Feed::Moisture).is_empty());
        assert_eq!(c.hw.indicators.lit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sample_publishes_exact_percentage() {
        let raw = 12_345;
        let mut c = controller(Some(raw));
        advance(INTERVAL).await;
        c.step().await;

        let published = c.bridge.published(Feed::Moisture);
        assert_eq!(published.len(), 1);
        let percent: f64 = published[0].parse().unwrap();
        assert_eq!(percent, f64::from(raw) / 40_000.0 * 100.0);
        assert_eq!(c.hw.indicators.shown(), Some(MoistureBand::Dry));
    }

    #[tokio::test(start_paused = true)]
    async fn indicators_follow_each_sample() {
        let mut c = controller(Some(20_000));
        advance(INTERVAL).await;
        c.step().await;
        assert_eq!(c.hw.indicators.shown(), Some(MoistureBand::Medium));

        c.hw.sensor = FixedSensor(Some(30_000));
        advance(INTERVAL).await;
        c.step().await;
        assert_eq!(c.hw.indicators.shown(), Some(MoistureBand::Moist));
        assert_eq!(c.hw.indicators.lit_count(), 1);
        assert_eq!(c.bridge.published(Feed::Moisture), vec!["50", "75"]);
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_failure_skips_tick() {
        let mut c = controller(None);
        advance(INTERVAL).await;
        c.step().await;

        assert!(c.bridge.published(Feed::Moisture).is_empty());
        assert_eq!(c.hw.indicators.lit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn one_alert_per_dry_cycle() {
        // 10% moisture, 20 s sampling, 40 s cooldown.
        let mut c = controller(Some(4_000));
        for _ in 0..5 {
            advance(INTERVAL).await;
            c.step().await;
        }

        assert_eq!(c.bridge.published(Feed::Moisture).len(), 5);
        let alerts = c.bridge.published(Feed::Alert);
        assert_eq!(alerts.len(), 1);

        let alert: serde_json::Value = serde_json::from_str(alerts[0]).unwrap();
        assert_eq!(alert["message"], ALERT_TEXT);
        assert_eq!(alert["dry_for_sec"], 40);
        assert_eq!(alert["percent"], 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn moist_soil_never_alerts() {
        let mut c = controller(Some(36_000));
        for _ in 0..10 {
            advance(INTERVAL).await;
            c.step().await;
        }
        assert!(c.bridge.published(Feed::Alert).is_empty());
        assert!(!c.machine.needs_water());
    }

    // -- Transport faults ---------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn fault_reconnects_once_and_skips_sampling() {
        let mut c = controller(Some(30_000));
        c.bridge.push_fault();
        advance(INTERVAL).await;

        c.step().await;

        assert_eq!(
            c.bridge.calls,
            vec![BridgeCall::Service, BridgeCall::Reconnect]
        );
        assert!(c.bridge.published(Feed::Moisture).is_empty());

        // Back to normal on the next iteration, sample included.
        c.step().await;
        assert_eq!(c.bridge.count(&BridgeCall::Reconnect), 1);
        assert_eq!(c.bridge.published(Feed::Moisture).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_faults_back_off() {
        let mut c = controller(Some(30_000));
        c.bridge.fail_reconnect = true;
        c.bridge.push_fault();
        c.bridge.push_fault();
        c.bridge.push_fault();

        let start = Instant::now();
        for _ in 0..3 {
            c.step().await;
        }

        // 500 ms + 1 s + 2 s with the default policy.
        assert!(start.elapsed() >= Duration::from_millis(3_500));
        assert_eq!(c.bridge.count(&BridgeCall::Reconnect), 3);
        assert!(c.bridge.published(Feed::Moisture).is_empty());

        // A clean service call resets the delay.
        c.step().await;
        let before = Instant::now();
        c.bridge.push_fault();
        c.step().await;
        assert!(before.elapsed() < Duration::from_millis(600));
    }
}
