//! Buzzer melodies: note-name to frequency conversion and sequenced playback.
//!
//! Playback holds each note with `tokio::time::sleep`.  The caller is the
//! single control loop, so nothing else runs (including MQTT servicing)
//! until the sequence finishes.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

use crate::hw::ToneOutput;

/// Semitone order within an octave, starting from C.
const PITCHES: [&str; 12] = [
    "c", "c#", "d", "d#", "e", "f", "f#", "g", "g#", "a", "a#", "b",
];

/// Index of A in [`PITCHES`]; A4 is the 440 Hz reference.
const A_INDEX: f64 = 9.0;
const A4_HZ: f64 = 440.0;

#[derive(Debug, Error, PartialEq)]
pub enum ToneError {
    #[error("invalid note name '{0}'")]
    InvalidNote(String),
    #[error("invalid duration {units} for note {note:?}")]
    InvalidDuration { note: Option<String>, units: f32 },
    #[error("tone output failed: {0}")]
    Output(String),
}

/// One step of a melody.  `note == None` is a rest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneEvent {
    pub note: Option<&'static str>,
    /// Length in melody units (eighth notes for [`MELODY`]).
    pub units: f32,
}

const fn n(note: &'static str, units: f32) -> ToneEvent {
    ToneEvent {
        note: Some(note),
        units,
    }
}

const fn rest(units: f32) -> ToneEvent {
    ToneEvent { note: None, units }
}

/// The controller's only tune.  Played after a watering cycle and on request
/// from the buzzer feed.
pub const MELODY: [ToneEvent; 25] = [
    n("g4", 2.0),
    n("g5", 5.5),
    n("e5", 0.5),
    n("d5", 1.5),
    n("c5", 0.5),
    n("a4", 6.0),
    n("g4", 2.0),
    n("c5", 5.5),
    n("c5", 0.5),
    n("d5", 1.5),
    n("e5", 0.5),
    n("g5", 6.0),
    n("g4", 1.5),
    n("a4", 0.5),
    n("c5", 5.5),
    n("d5", 0.5),
    n("e5", 2.0),
    n("g5", 4.0),
    n("e2", 2.0),
    n("g5", 2.0),
    n("g5", 5.5),
    n("e5", 0.5),
    n("d5", 2.0),
    n("a4", 6.0),
    rest(2.0),
];

/// Equal-tempered frequency of a note such as `"g4"` or `"C#5"`.
///
/// The name is a pitch from `c`..`b` (optionally sharpened with `#`)
/// followed by a single octave digit.
pub fn frequency_of(name: &str) -> Result<f64, ToneError> {
    let invalid = || ToneError::InvalidNote(name.to_string());

    let mut chars = name.chars();
    let octave = chars
        .next_back()
        .and_then(|c| c.to_digit(10))
        .ok_or_else(invalid)?;
    let pitch = chars.as_str().to_ascii_lowercase();
    let index = PITCHES
        .iter()
        .position(|p| *p == pitch)
        .ok_or_else(invalid)?;

    let exponent = (f64::from(octave) - 4.0) + (index as f64 - A_INDEX) / 12.0;
    Ok(A4_HZ * 2f64.powf(exponent))
}

/// Check every event before anything is sounded.
pub fn validate(events: &[ToneEvent]) -> Result<(), ToneError> {
    for ev in events {
        if !ev.units.is_finite() || ev.units < 0.0 {
            return Err(ToneError::InvalidDuration {
                note: ev.note.map(str::to_string),
                units: ev.units,
            });
        }
        if let Some(name) = ev.note {
            frequency_of(name)?;
        }
    }
    Ok(())
}

/// Play `events` `repeat_count` times, holding each for `units * unit`.
///
/// The output is always silenced on return.  A malformed event aborts the
/// whole sequence before the first note.
pub async fn play_sequence<T: ToneOutput>(
    out: &mut T,
    events: &[ToneEvent],
    repeat_count: u32,
    unit: Duration,
) -> Result<(), ToneError> {
    let played = play_inner(out, events, repeat_count, unit).await;
    let silenced = out.silence();
    played.and(silenced)
}

async fn play_inner<T: ToneOutput>(
    out: &mut T,
    events: &[ToneEvent],
    repeat_count: u32,
    unit: Duration,
) -> Result<(), ToneError> {
    validate(events)?;

    debug!(events = events.len(), repeat_count, "tone sequence start");
    for _ in 0..repeat_count {
        for ev in events {
            match ev.note {
                Some(name) => {
                    let hz = frequency_of(name)?;
                    out.tone(hz.round() as u32)?;
                }
                None => out.silence()?,
            }
            sleep(unit.mul_f64(f64::from(ev.units))).await;
        }
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
