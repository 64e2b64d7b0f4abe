//! The transport clock and its control-side proxy.
//!
//! [`TransportClock`] runs inside the audio callback. It counts subdivisions
//! against the render clock and calls its step listeners synchronously, once per
//! elapsed subdivision. [`ClockProxy`] is what the control thread holds: every
//! call becomes a [`ClockCommand`](crate::audio_api::ClockCommand) and step
//! events come back over the engine's event channel.

mod proxy;
mod step;

pub use proxy::{ClockLink, ClockProxy, InitStatus, StateRequest};
pub use step::{ClockState, StepEvent};

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::shared::{self, ListenerId};

/// A step callback that runs on the render thread. Keep it short and don't block.
pub struct StepListener(Box<dyn FnMut(&StepEvent) + Send>);

impl StepListener {
    pub fn new(f: impl FnMut(&StepEvent) + Send + 'static) -> Self {
        Self(Box::new(f))
    }
}

impl fmt::Debug for StepListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StepListener")
    }
}

pub const MAX_LISTENERS: usize = 16;

#[derive(Debug)]
pub struct TransportClock {
    running: bool,
    paused: bool,
    step_count: u64,
    beat_count: u64,
    paused_step_count: u64,
    paused_beat_count: u64,
    next_event_time: f64,
    bpm: f64,
    beats_per_bar: u32,
    num_bars: u32,
    subdivisions: u32,
    // bumped by start, stop and reset; steps carry it so stale ones can be told apart
    epoch: u64,
    listeners: Vec<(ListenerId, StepListener)>,
    listener_panics: u64,
}

impl Default for TransportClock {
    fn default() -> Self {
        Self::new(shared::DEFAULT_BEATS_PER_BAR, 1, shared::SUBDIVISIONS_PER_BEAT)
    }
}

impl TransportClock {
    pub fn new(beats_per_bar: u32, num_bars: u32, subdivisions: u32) -> Self {
        Self {
            running: false,
            paused: false,
            step_count: 0,
            beat_count: 0,
            paused_step_count: 0,
            paused_beat_count: 0,
            next_event_time: 0.0,
            bpm: shared::DEFAULT_BPM,
            beats_per_bar: beats_per_bar.max(1),
            num_bars: num_bars.max(1),
            subdivisions: subdivisions.max(1),
            epoch: 0,
            listeners: Vec::with_capacity(MAX_LISTENERS),
            listener_panics: 0,
        }
    }

    /// Starts at `start_time`. Coming out of a pause it picks up the saved
    /// position, otherwise it starts from zero.
    pub fn start(&mut self, start_time: f64) {
        self.next_event_time = start_time;
        if self.paused {
            self.step_count = self.paused_step_count;
            self.beat_count = self.paused_beat_count;
            self.paused = false;
        } else {
            self.step_count = 0;
            self.beat_count = 0;
        }
        self.running = true;
        self.epoch += 1;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.paused = false;
        self.step_count = 0;
        self.beat_count = 0;
        self.paused_step_count = 0;
        self.paused_beat_count = 0;
        self.epoch += 1;
    }

    pub fn pause(&mut self) {
        if !self.running {
            return;
        }
        self.paused_step_count = self.step_count;
        self.paused_beat_count = self.beat_count;
        self.paused = true;
        self.running = false;
    }

    /// Zeroes the position and forgets any pause. Leaves `running` alone.
    pub fn reset(&mut self) {
        self.step_count = 0;
        self.beat_count = 0;
        self.paused_step_count = 0;
        self.paused_beat_count = 0;
        self.paused = false;
        self.epoch += 1;
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = shared::clamp_bpm(bpm);
    }

    pub fn set_beats_per_bar(&mut self, beats: u32) {
        self.beats_per_bar = beats.max(1);
    }

    pub fn set_num_bars(&mut self, bars: u32) {
        self.num_bars = bars.max(1);
    }

    pub fn set_subdivisions(&mut self, subdivisions: u32) {
        self.subdivisions = subdivisions.max(1);
    }

    /// Returns false, dropping the listener, when the table is full.
    pub fn add_listener(&mut self, id: ListenerId, listener: StepListener) -> bool {
        if self.listeners.len() >= MAX_LISTENERS {
            return false;
        }
        self.listeners.push((id, listener));
        true
    }

    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn listener_panics(&self) -> u64 {
        self.listener_panics
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn state(&self) -> ClockState {
        ClockState {
            running: self.running,
            paused: self.paused,
            step_count: self.step_count,
            beat_count: self.beat_count,
            paused_step_count: self.paused_step_count,
            paused_beat_count: self.paused_beat_count,
            next_event_time: self.next_event_time,
            bpm: self.bpm,
            beats_per_bar: self.beats_per_bar,
            num_bars: self.num_bars,
            subdivisions: self.subdivisions,
            epoch: self.epoch,
        }
    }

    /// Walks `frames` frames starting at `block_start` seconds. At each frame at
    /// most one step is emitted; a late clock does not burst to catch up.
    /// Returns how many steps fired.
    pub fn process(&mut self, block_start: f64, frames: usize, sample_rate: f64) -> usize {
        let mut fired = 0;
        for i in 0..frames {
            if !self.running {
                break;
            }
            let now = block_start + i as f64 / sample_rate;
            if now >= self.next_event_time {
                self.emit(now);
                fired += 1;
                let beat_duration = 60.0 / self.bpm;
                self.next_event_time += beat_duration / self.subdivisions as f64;
            }
        }
        fired
    }

    fn emit(&mut self, now: f64) {
        let subdivisions = self.subdivisions as u64;
        let beats_per_bar = self.beats_per_bar as u64;
        self.beat_count = self.step_count / subdivisions;
        let event = StepEvent {
            global_step: self.step_count,
            global_beat: self.beat_count,
            scheduled_time: self.next_event_time,
            actual_time: now,
            deviation: now - self.next_event_time,
            step_index: (self.step_count % subdivisions) as u32,
            beat_index: (self.beat_count % beats_per_bar) as u32,
            bar_index: ((self.beat_count / beats_per_bar) % self.num_bars as u64) as u32,
            beats_per_bar: self.beats_per_bar,
            num_bars: self.num_bars,
            subdivisions: self.subdivisions,
            epoch: self.epoch,
        };
        for (_, listener) in self.listeners.iter_mut() {
            // panics are counted and reported; the clock keeps going
            if catch_unwind(AssertUnwindSafe(|| (listener.0)(&event))).is_err() {
                self.listener_panics += 1;
            }
        }
        self.step_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const SR: f64 = 48_000.0;
    const BLOCK: usize = 128;

    // drives the clock block by block from `t0` for `secs` seconds
    fn run(clock: &mut TransportClock, t0: f64, secs: f64) -> f64 {
        let blocks = (secs * SR / BLOCK as f64).ceil() as usize;
        let start_frame = (t0 * SR).round() as u64;
        for b in 0..blocks {
            let frame = start_frame + (b * BLOCK) as u64;
            clock.process(frame as f64 / SR, BLOCK, SR);
        }
        (start_frame + (blocks * BLOCK) as u64) as f64 / SR
    }

    fn recorder(clock: &mut TransportClock) -> Arc<Mutex<Vec<StepEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        clock.add_listener(
            shared::next_listener_id(),
            StepListener::new(move |ev| sink.lock().unwrap().push(*ev)),
        );
        seen
    }

    #[test]
    fn steps_are_monotonic_and_indices_derive_from_count() {
        let mut clock = TransportClock::new(4, 2, 4);
        clock.set_bpm(120.0);
        let seen = recorder(&mut clock);
        clock.start(0.0);
        run(&mut clock, 0.0, 5.0);
        let seen = seen.lock().unwrap();
        // 8 steps per second at 120 bpm in 16ths
        assert!(seen.len() >= 39 && seen.len() <= 41, "{}", seen.len());
        for (i, ev) in seen.iter().enumerate() {
            assert_eq!(ev.global_step, i as u64);
            assert_eq!(ev.global_beat, ev.global_step / 4);
            assert_eq!(ev.step_index as u64, ev.global_step % 4);
            assert_eq!(ev.beat_index as u64, ev.global_beat % 4);
            assert_eq!(ev.bar_index as u64, (ev.global_beat / 4) % 2);
            assert!(ev.deviation >= 0.0 && ev.deviation < 1.0 / SR + 1e-12);
        }
        assert!(seen.windows(2).all(|w| w[1].global_step > w[0].global_step));
        assert_eq!(seen[32].pattern_index(), 0); // wrapped after two bars
    }

    #[test]
    fn pause_and_resume_keep_position() {
        let mut clock = TransportClock::new(4, 4, 4);
        let seen = recorder(&mut clock);
        clock.start(0.0);
        let t = run(&mut clock, 0.0, 1.3);
        let before = clock.state();
        clock.pause();
        let paused = clock.state();
        assert!(!paused.running && paused.paused);
        assert_eq!(paused.paused_step_count, before.step_count);
        let count_at_pause = seen.lock().unwrap().len();

        // nothing fires while paused
        let t = run(&mut clock, t, 0.5);
        assert_eq!(seen.lock().unwrap().len(), count_at_pause);

        clock.start(t);
        run(&mut clock, t, 0.5);
        let seen = seen.lock().unwrap();
        let resumed = &seen[count_at_pause];
        assert_eq!(resumed.global_step, before.step_count);
        assert_eq!(resumed.global_beat, before.step_count / 4);
        assert_eq!(seen[count_at_pause - 1].global_step + 1, resumed.global_step);
    }

    #[test]
    fn stop_zeroes_and_reset_keeps_running() {
        let mut clock = TransportClock::default();
        clock.start(0.0);
        run(&mut clock, 0.0, 1.0);
        clock.reset();
        let s = clock.state();
        assert!(s.running);
        assert_eq!((s.step_count, s.beat_count), (0, 0));

        clock.pause();
        clock.stop();
        let s = clock.state();
        assert!(!s.running && !s.paused);
        assert_eq!((s.step_count, s.paused_step_count), (0, 0));
        // start after stop begins from zero, not from the old pause
        clock.start(2.0);
        assert_eq!(clock.state().step_count, 0);
    }

    #[test]
    fn reset_while_running_restarts_indices() {
        let mut clock = TransportClock::new(4, 1, 4);
        let seen = recorder(&mut clock);
        clock.start(0.0);
        let t = run(&mut clock, 0.0, 0.7);
        clock.reset();
        let n = seen.lock().unwrap().len();
        run(&mut clock, t, 0.3);
        let seen = seen.lock().unwrap();
        let next = &seen[n];
        assert_eq!((next.step_index, next.beat_index, next.bar_index), (0, 0, 0));
        assert_eq!(next.global_step, 0);
    }

    #[test]
    fn tempo_change_applies_on_next_step() {
        let mut clock = TransportClock::new(4, 1, 4);
        clock.set_bpm(60.0);
        let seen = recorder(&mut clock);
        clock.start(0.0);
        let t = run(&mut clock, 0.0, 0.3); // steps at 0 and 0.25
        clock.set_bpm(240.0);
        run(&mut clock, t, 0.5);
        let seen = seen.lock().unwrap();
        let gaps: Vec<f64> = seen.windows(2).map(|w| w[1].scheduled_time - w[0].scheduled_time).collect();
        assert!((gaps[0] - 0.25).abs() < 1e-9);
        assert!(gaps.last().is_some_and(|g| (g - 0.0625).abs() < 1e-9));
    }

    #[test]
    fn bpm_is_clamped() {
        let mut clock = TransportClock::default();
        clock.set_bpm(5000.0);
        assert_eq!(clock.state().bpm, shared::MAX_BPM);
        clock.set_bpm(-3.0);
        assert_eq!(clock.state().bpm, shared::MIN_BPM);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_clock() {
        let mut clock = TransportClock::new(4, 1, 4);
        clock.add_listener(shared::next_listener_id(), StepListener::new(|_| panic!("bad listener")));
        let seen = recorder(&mut clock);
        clock.start(0.0);
        // exactly 10 steps at 120 bpm: 0.0 .. 1.125
        run(&mut clock, 0.0, 1.2);
        assert_eq!(seen.lock().unwrap().len(), 10);
        assert_eq!(clock.listener_panics(), 10);
        assert!(clock.state().running);
    }

    #[test]
    fn listener_table_is_bounded() {
        let mut clock = TransportClock::default();
        for _ in 0..MAX_LISTENERS {
            assert!(clock.add_listener(shared::next_listener_id(), StepListener::new(|_| {})));
        }
        assert!(!clock.add_listener(shared::next_listener_id(), StepListener::new(|_| {})));
        assert_eq!(clock.listener_count(), MAX_LISTENERS);
    }

    #[test]
    fn listeners_can_be_removed() {
        let mut clock = TransportClock::default();
        let id = shared::next_listener_id();
        assert!(clock.add_listener(id, StepListener::new(|_| {})));
        assert_eq!(clock.listener_count(), 1);
        clock.remove_listener(id);
        assert_eq!(clock.listener_count(), 0);
    }

    #[test]
    fn steps_carry_the_transport_epoch() {
        let mut clock = TransportClock::new(4, 1, 4);
        let seen = recorder(&mut clock);
        clock.start(0.0);
        let t = run(&mut clock, 0.0, 0.3);
        clock.reset();
        let t = run(&mut clock, t, 0.2);
        clock.pause();
        clock.start(t);
        run(&mut clock, t, 0.2);
        clock.stop();
        assert_eq!(clock.state().epoch, 4);

        let seen = seen.lock().unwrap();
        let epochs: Vec<u64> = seen.iter().map(|ev| ev.epoch).collect();
        assert_eq!(epochs.first(), Some(&1));
        assert!(epochs.contains(&2) && epochs.contains(&3));
        // pause alone doesn't start a new run
        assert!(epochs.windows(2).all(|w| w[1] == w[0] || w[1] == w[0] + 1));
        let first_after_reset = seen.iter().find(|ev| ev.epoch == 2).unwrap();
        assert_eq!(first_after_reset.global_step, 0);
    }
}
