// constants and small value types shared between the control side and the render side

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub const STEPS_PER_PATTERN: usize = 16; // one bar of 16ths in the default grid
pub const SUBDIVISIONS_PER_BEAT: u32 = 4;
pub const DEFAULT_BEATS_PER_BAR: u32 = 4;

pub const DEFAULT_BPM: f64 = 120.0;
pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 960.0;
// what the demo knob lets you reach; the engine accepts MIN_BPM..=MAX_BPM
pub const UI_MIN_BPM: f64 = 60.0;
pub const UI_MAX_BPM: f64 = 180.0;

pub const NO_SWING: f64 = 0.5;
pub const MAX_SWING: f64 = 1.0;

pub const MAX_VELOCITY: f32 = 255.0;

/// Clamps a tempo into the range the clock can run at. Non-finite input falls
/// back to the default tempo.
pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() { bpm.clamp(MIN_BPM, MAX_BPM) } else { DEFAULT_BPM }
}

pub fn clamp_swing(swing: f64) -> f64 {
    if swing.is_finite() { swing.clamp(NO_SWING, MAX_SWING) } else { NO_SWING }
}

/// Identifies one track (one sample slot) of a kit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u8);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn label(self) -> &'static str {
        match self {
            PlaybackState::Stopped => "STOP",
            PlaybackState::Playing => "PLAY",
            PlaybackState::Paused => "PAUSE",
        }
    }
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle for a step listener registered with the transport clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Handle returned by `EventBus::subscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

// fancy atomic counter lets us generate unique ids while in threads
pub fn next_listener_id() -> ListenerId {
    ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
}

pub fn next_subscription_id() -> SubscriptionId {
    SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpm_clamps_to_clock_range() {
        assert_eq!(clamp_bpm(5.0), MIN_BPM);
        assert_eq!(clamp_bpm(2000.0), MAX_BPM);
        assert_eq!(clamp_bpm(f64::NAN), DEFAULT_BPM);
        assert_eq!(clamp_bpm(133.0), 133.0);
    }

    #[test]
    fn ids_are_unique() {
        let a = next_listener_id();
        let b = next_listener_id();
        assert_ne!(a, b);
        assert_ne!(next_subscription_id(), next_subscription_id());
    }
}
