//! Timing math for the sequencer.
//!
//! Everything here is a pure function of a [`Pattern`] and transport times. The
//! live step handler and the look-ahead window enumerator both get their swing from
//! [`swing_offset`], so a hit lands at the same time whichever path schedules it.

use crate::pattern::{Hit, Pattern};
use crate::shared;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackMetrics {
    pub slot_duration: f64,
    pub beat_duration: f64,
    pub swing: f64,
    pub start_iteration: i64,
    pub sequence_duration: f64,
}

/// A hit resolved to an absolute time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedHit {
    pub slot: usize,
    pub iteration: i64,
    pub hit: Hit,
    pub time: f64,
}

pub fn calculate_metrics(pattern: &Pattern, window_start: f64, transport_start: f64) -> PlaybackMetrics {
    let beat_duration = 60.0 / pattern.bpm;
    let slot_duration = beat_duration / pattern.time_signature.beat_unit as f64;
    let bar_duration = pattern.time_signature.beats_per_bar as f64 * beat_duration;
    let sequence_duration = pattern.bars as f64 * bar_duration;
    let start_iteration = if sequence_duration > 0.0 {
        ((window_start - transport_start) / sequence_duration).floor() as i64
    } else {
        0
    };
    PlaybackMetrics {
        slot_duration,
        beat_duration,
        swing: pattern.swing,
        start_iteration,
        sequence_duration,
    }
}

/// Position of `slot` measured in sixteenth notes, when it sits exactly on a
/// sixteenth boundary. `slots_per_beat` is how many slots make up one beat.
pub fn sixteenth_position(slot: usize, slots_per_beat: u32) -> Option<u64> {
    let per_beat = u64::from(slots_per_beat.max(1));
    let scaled = slot as u64 * 4;
    (scaled % per_beat == 0).then_some(scaled / per_beat)
}

/// Swing delay for a slot at the given sixteenth position. Only odd sixteenths
/// move, by at most one sixteenth (`swing` is clamped to [0.5, 1]).
pub fn swing_offset(sixteenth: Option<u64>, beat_duration: f64, swing: f64) -> f64 {
    match sixteenth {
        Some(pos) if pos % 2 == 1 => {
            let sixteenth_duration = beat_duration / 4.0;
            (shared::clamp_swing(swing) - 0.5) * 2.0 * sixteenth_duration
        }
        _ => 0.0,
    }
}

/// Base time of `slot` within one loop plus its swing offset.
pub fn apply_swing(
    slot: usize,
    slot_duration: f64,
    pattern: &Pattern,
    beat_duration: f64,
    swing: f64,
    hit: Hit,
) -> (Hit, f64) {
    let base = slot as f64 * slot_duration;
    let sixteenth = sixteenth_position(slot, pattern.time_signature.beat_unit);
    let offset = swing_offset(sixteenth, beat_duration, swing);
    if offset == 0.0 {
        (hit, base)
    } else {
        (hit, base + offset)
    }
}

/// Deterministic xorshift generator addressed by index rather than advanced by
/// calls: the same `(seed, index)` always gives the same value in [0, 1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeededRng {
    seed: u32,
}

impl SeededRng {
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    pub fn value(&self, index: f64) -> f64 {
        let mut state = wrap_i32(f64::from(self.seed) + index * 1_000_003.0);
        state ^= state << 13;
        state ^= ((state as u32) >> 17) as i32;
        state ^= state << 5;
        f64::from(state as u32) / 4_294_967_296.0
    }
}

// truncate toward zero and wrap into 32 bits, the way integer bit ops see a float
fn wrap_i32(x: f64) -> i32 {
    if !x.is_finite() {
        return 0;
    }
    let wrapped = x.trunc().rem_euclid(4_294_967_296.0);
    wrapped as u32 as i32
}

/// Jitters one hit's time and velocity. The draws are seeded from the hit's time,
/// its sample size and the loop iteration, so the same loop always plays the same
/// way. Velocity is not clamped here; `Hit::gain` clamps at playback.
pub fn humanize(hit: Hit, time: f64, pattern: &Pattern, rng: &SeededRng, iteration: i64) -> (Hit, f64) {
    let Some(amount) = pattern.humanize.filter(|h| !h.is_off()) else {
        return (hit, time);
    };
    let beat_duration = 60.0 / pattern.bpm;
    let slot_duration = beat_duration / pattern.time_signature.beat_unit as f64;
    let byte_len = hit.sample.byte_len as f64;
    let scale = (iteration + 1) as f64;

    let deviation = if amount.timing > 0.0 {
        let max_deviation = slot_duration * amount.timing;
        let rv = rng.value(time + byte_len * scale);
        (rv * 2.0 - 1.0) * max_deviation
    } else {
        0.0
    };
    let rv = rng.value((time + byte_len + 1.0) * scale);
    let velocity = hit.velocity - (rv * amount.velocity) as f32;

    (Hit { velocity, ..hit }, time + deviation)
}

/// Every hit whose final time falls in `[window_start, window_start + duration)`,
/// for a pattern that has been looping since `start_time`. Swing is applied first,
/// then humanize, per loop iteration.
pub fn notes_in_window(
    pattern: &Pattern,
    window_start: f64,
    window_duration: f64,
    start_time: f64,
    rng: &SeededRng,
) -> Vec<TimedHit> {
    if pattern.notes.is_empty() || !(window_duration > 0.0) || !(pattern.bpm > 0.0) {
        return Vec::new();
    }
    let metrics = calculate_metrics(pattern, window_start, start_time);
    if !(metrics.sequence_duration > 0.0) {
        return Vec::new();
    }

    let template: Vec<(usize, Hit, f64)> = pattern
        .notes
        .iter()
        .enumerate()
        .flat_map(|(slot, hits)| hits.iter().map(move |hit| (slot, *hit)))
        .map(|(slot, hit)| {
            let (hit, time) = apply_swing(
                slot,
                metrics.slot_duration,
                pattern,
                metrics.beat_duration,
                metrics.swing,
                hit,
            );
            (slot, hit, time)
        })
        .collect();

    let window_end = window_start + window_duration;
    let end_iteration = ((window_end - start_time) / metrics.sequence_duration).ceil() as i64;
    // negative timing jitter can pull the previous loop's tail into the window
    let jitters = pattern.humanize.is_some_and(|h| h.timing > 0.0);
    let first_iteration = metrics.start_iteration - i64::from(jitters);

    let mut out = Vec::new();
    for iteration in first_iteration..=end_iteration {
        let offset = iteration as f64 * metrics.sequence_duration + start_time;
        for &(slot, hit, time) in &template {
            let (hit, time) = humanize(hit, time, pattern, rng, iteration);
            let time = time + offset;
            if time >= window_start && time < window_end {
                out.push(TimedHit { slot, iteration, hit, time });
            }
        }
    }
    out
}
