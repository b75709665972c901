//! Payload parsing for the three control feeds.

use thiserror::Error;

use crate::bridge::Feed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpCommand {
    /// Water, then play the melody.
    WaterCycle,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuzzerCommand {
    Sing,
    /// Same effect as [`PumpCommand::Off`]; the dashboard's buzzer switch
    /// doubles as a pump kill switch.
    PumpOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationCommand {
    Fact,
    Joke,
    Recipe,
    /// The dashboard button returning to rest.
    Neutral,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unexpected message on {feed} feed: '{payload}'")]
pub struct UnrecognizedCommand {
    pub feed: Feed,
    pub payload: String,
}

fn unrecognized(feed: Feed, payload: &str) -> UnrecognizedCommand {
    UnrecognizedCommand {
        feed,
        payload: payload.to_string(),
    }
}

impl PumpCommand {
    pub fn parse(payload: &str) -> Result<Self, UnrecognizedCommand> {
        match payload.trim() {
            "0" => Ok(Self::WaterCycle),
            "1" => Ok(Self::Off),
            other => Err(unrecognized(Feed::Pump, other)),
        }
    }
}

impl BuzzerCommand {
    pub fn parse(payload: &str) -> Result<Self, UnrecognizedCommand> {
        match payload.trim() {
            "0" => Ok(Self::Sing),
            "1" => Ok(Self::PumpOff),
            other => Err(unrecognized(Feed::Buzzer, other)),
        }
    }
}

impl ConversationCommand {
    /// The conversation feed also carries our own replies, so anything that
    /// is not a button label is expected traffic, not an error.
    pub fn parse(payload: &str) -> Option<Self> {
        match payload.trim() {
            "Give me a fact!" => Some(Self::Fact),
            "Tell me a joke!" => Some(Self::Joke),
            "Recipe Ideas" => Some(Self::Recipe),
            "---------" => Some(Self::Neutral),
            _ => None,
        }
    }
}
