//! The messaging seam between the control loop and the cloud broker.

use std::fmt;

use thiserror::Error;

/// Named pub/sub channels the controller uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    /// Inbound: `"0"` runs a watering cycle, `"1"` stops the pump.
    Pump,
    /// Both ways: button presses in, generated replies out.
    Conversation,
    /// Inbound: `"0"` plays the melody, `"1"` stops the pump.
    Buzzer,
    /// Outbound: moisture percentage every sampling tick.
    Moisture,
    /// Outbound: dry-soil alerts.
    Alert,
    /// Outbound, retained: `online` / `offline` (last will).
    Status,
}

impl Feed {
    /// Feeds subscribed at startup.
    pub const CONTROL: [Feed; 3] = [Feed::Pump, Feed::Conversation, Feed::Buzzer];

    pub fn name(self) -> &'static str {
        match self {
            Self::Pump => "pump",
            Self::Conversation => "conversation",
            Self::Buzzer => "buzzer",
            Self::Moisture => "moisture",
            Self::Alert => "alert",
            Self::Status => "status",
        }
    }

    /// Inverse of [`Feed::name`].  `water` is the older name of the pump feed.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pump" | "water" => Some(Self::Pump),
            "conversation" => Some(Self::Conversation),
            "buzzer" => Some(Self::Buzzer),
            "moisture" => Some(Self::Moisture),
            "alert" => Some(Self::Alert),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Full topic for `feed` under `prefix`.
pub fn topic_for(prefix: &str, feed: Feed) -> String {
    format!("{prefix}{}", feed.name())
}

/// Extract the feed from `<prefix><feed name>`.
pub fn parse_topic(prefix: &str, topic: &str) -> Option<Feed> {
    topic.strip_prefix(prefix).and_then(Feed::from_name)
}

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    pub feed: Feed,
    pub payload: String,
}

impl FeedMessage {
    pub fn new(feed: Feed, payload: impl Into<String>) -> Self {
        Self {
            feed,
            payload: payload.into(),
        }
    }
}

/// The broker connection is broken; the caller must reconnect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport fault: {0}")]
pub struct TransportFault(pub String);

/// What the control loop needs from the messaging transport.
#[allow(async_fn_in_trait)]
pub trait Bridge {
    async fn subscribe(&mut self, feed: Feed) -> Result<(), TransportFault>;

    async fn publish(&mut self, feed: Feed, payload: String) -> Result<(), TransportFault>;

    /// Wait a short, bounded time for one inbound message.
    async fn service(&mut self) -> Result<Option<FeedMessage>, TransportFault>;

    /// Re-establish the session and restore subscriptions.
    async fn reconnect(&mut self) -> Result<(), TransportFault>;
}

// ---------------------------------------------------------------------------
// Scripted bridge (tests)
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
