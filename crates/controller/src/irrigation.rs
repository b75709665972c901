//! Dry-soil alerting with a cooldown.
//!
//! ```text
//! Wet ──[dry, armed]──▶ DryFlaggedWaiting ──[cooldown elapsed]──▶ (alert) ──▶ DryUnflagged
//!  ▲                          │                                                  │
//!  └──[medium/moist]──────────┴──────────────────────────[dry, armed]── back to waiting
//! ```
//!
//! Alerting is a transition rather than a resting state: the tick that sees
//! the cooldown expire returns the [`Alert`] and lands in `DryUnflagged` with
//! alerts re-armed.  The next dry tick starts a fresh cycle.

use std::time::Duration;

use tokio::time::Instant;

use crate::moisture::MoistureBand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrrigationState {
    /// Medium or moist soil; nothing pending.
    Wet,
    /// Dry, no cycle in progress.
    DryUnflagged,
    /// Dry since `dry_since`; alert fires once the cooldown has elapsed.
    DryFlaggedWaiting { dry_since: Instant },
}

/// Raised once per dry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub dry_since: Instant,
    /// Time spent dry before the alert fired.
    pub dry_for: Duration,
}

#[derive(Debug)]
pub struct IrrigationMachine {
    state: IrrigationState,
    cooldown: Duration,
}

impl IrrigationMachine {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: IrrigationState::Wet,
            cooldown,
        }
    }

    /// Feed one sampling tick.
    pub fn update(&mut self, band: MoistureBand, now: Instant) -> Option<Alert> {
        if band != MoistureBand::Dry {
            self.state = IrrigationState::Wet;
            return None;
        }

        match self.state {
            IrrigationState::Wet | IrrigationState::DryUnflagged => {
                self.state = IrrigationState::DryFlaggedWaiting { dry_since: now };
                None
            }
            IrrigationState::DryFlaggedWaiting { dry_since } => {
                let dry_for = now.saturating_duration_since(dry_since);
                if dry_for < self.cooldown {
                    return None;
                }
                self.state = IrrigationState::DryUnflagged;
                Some(Alert { dry_since, dry_for })
            }
        }
    }

    pub fn state(&self) -> IrrigationState {
        self.state
    }

    pub fn needs_water(&self) -> bool {
        matches!(self.state, IrrigationState::DryFlaggedWaiting { .. })
    }

    pub fn dry_since(&self) -> Option<Instant> {
        match self.state {
            IrrigationState::DryFlaggedWaiting { dry_since } => Some(dry_since),
            _ => None,
        }
    }

    /// Whether the next dry tick opens a new cycle.
    pub fn is_armed(&self) -> bool {
        !self.needs_water()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
