//! The playback pipeline: the control-side owner of the clock proxy, the effects
//! graph and the current pattern.
//!
//! Step events arrive from the render thread through [`ClockProxy::poll`]; the
//! caller drives that by calling [`PlaybackPipeline::pump`] from its own loop (the
//! demo does it once per UI tick). Each step reads the pattern fresh from the
//! [`PatternHandle`], so edits apply on the next step without restarting anything.
//! The optional per-step callback given to `play` is a listener on the proxy.

pub mod events;
pub mod kit;
pub mod pattern_handle;
#[cfg(test)]
pub(crate) mod test_fixture;

use std::sync::Arc;
use std::time::Duration;

pub use events::{EventBus, PipelineEvent, PipelineEventKind};
pub use kit::{GridState, Kit, TrackDef, grid_to_notes, pattern_from_grid};
pub use pattern_handle::{PatternHandle, Versioned};

use crate::audio::graph::{Automatable, Connectable, NodeId, OutputEffectsChain, RemoteGraph, TrackRouter};
use crate::audio::{AudioHandle, SampleMap, StereoFrame};
use crate::audio_api::{AudioCommand, TriggerParams};
use crate::clock::{ClockProxy, StateRequest, StepEvent};
use crate::config::{EngineConfig, RoutingMode};
use crate::error::{GraphError, PipelineError};
use crate::loader::{RawSample, SampleDecoder};
use crate::pattern::Pattern;
use crate::shared::{self, PlaybackState, SubscriptionId, TrackId};
use crate::timing;

pub type StepCallback = Box<dyn FnMut(&StepEvent)>;

enum Routing {
    Shared(OutputEffectsChain),
    PerTrack(TrackRouter),
}

impl Routing {
    fn build(
        graph: &mut RemoteGraph,
        mode: RoutingMode,
        samples: &SampleMap,
        impulse: &[StereoFrame],
    ) -> Result<Self, GraphError> {
        let routing = match mode {
            RoutingMode::SharedChain => Routing::Shared(OutputEffectsChain::build(graph, impulse)?),
            RoutingMode::PerTrackSends => Routing::PerTrack(TrackRouter::build(graph, samples.tracks(), impulse)?),
        };
        match &routing {
            Routing::Shared(chain) => chain.connect(graph, NodeId::DESTINATION)?,
            Routing::PerTrack(router) => router.connect(graph, NodeId::DESTINATION)?,
        }
        Ok(routing)
    }

    fn effects(&self) -> &OutputEffectsChain {
        match self {
            Routing::Shared(chain) => chain,
            Routing::PerTrack(router) => router.effects(),
        }
    }

    fn dest_for(&self, track: TrackId) -> NodeId {
        match self {
            Routing::Shared(chain) => chain.input(),
            Routing::PerTrack(router) => router.track_input(track).unwrap_or_else(|| router.effects().input()),
        }
    }

    fn teardown(&self, graph: &mut RemoteGraph) -> Result<(), GraphError> {
        match self {
            Routing::Shared(chain) => chain.teardown(graph),
            Routing::PerTrack(router) => router.teardown(graph),
        }
    }
}

pub struct PlaybackPipeline {
    audio: Option<AudioHandle>, // None once disposed
    graph: RemoteGraph,
    clock: ClockProxy,
    routing: Option<Routing>,
    samples: Arc<SampleMap>,
    config: EngineConfig,
    pattern: Option<PatternHandle>,
    events: EventBus,
    state: PlaybackState,
    // what the clock was last told, to send only real changes
    clock_bpm: f64,
    clock_bars: u32,
    echo_delay: Option<f32>,
    scheduled_hits: u64,
}

impl PlaybackPipeline {
    /// Decodes the samples and the impulse, hands the samples to the engine,
    /// registers with the clock and builds the effects graph.
    ///
    /// The clock's acknowledgement arrives asynchronously; commands issued before
    /// it are queued behind the registration. Use [`wait_ready`](Self::wait_ready)
    /// to block on it.
    pub fn new(
        audio: AudioHandle,
        sources: &[RawSample],
        impulse: &RawSample,
        decoder: &dyn SampleDecoder,
        config: EngineConfig,
    ) -> Result<Self, PipelineError> {
        let sample_rate = audio.sample_rate();
        let samples = Arc::new(SampleMap::decode(sources, decoder, sample_rate)?);
        let impulse = decoder.decode(impulse, sample_rate)?;
        audio.send(AudioCommand::UseSamples(samples.clone()));

        let mut clock = ClockProxy::new(audio.clock_link());
        clock.init()?;
        clock.set_subdivisions(shared::SUBDIVISIONS_PER_BEAT)?;

        let mut graph = audio.remote_graph();
        let routing = Routing::build(&mut graph, config.routing, &samples, &impulse.data)?;
        let effects = routing.effects();
        effects.echo_level().set(&mut graph, config.echo_level)?;
        effects.echo_feedback().set(&mut graph, config.echo_feedback)?;
        effects.reverb_level().set(&mut graph, config.reverb_level)?;

        log::info!(
            "pipeline ready: {} samples at {sample_rate} Hz, {:?} routing",
            samples.len(),
            config.routing
        );
        Ok(Self {
            audio: Some(audio),
            graph,
            clock_bpm: clock.bpm(),
            clock_bars: clock.num_bars(),
            clock,
            routing: Some(routing),
            samples,
            config,
            pattern: None,
            events: EventBus::default(),
            state: PlaybackState::Stopped,
            echo_delay: None,
            scheduled_hits: 0,
        })
    }

    /// Blocks until the render side has acknowledged the clock registration.
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<(), PipelineError> {
        self.ensure_live()?;
        Ok(self.clock.init_blocking(timeout)?)
    }

    pub fn play(&mut self, pattern: PatternHandle, on_step: Option<StepCallback>) -> Result<(), PipelineError> {
        self.ensure_live()?;
        let snapshot = pattern.load();
        snapshot.pattern.validate()?;

        if self.state == PlaybackState::Playing {
            self.clock.stop()?;
        }
        self.clock.clear_step_listeners();
        if let Some(cb) = on_step {
            self.clock.on_step(cb);
        }
        self.pattern = Some(pattern);

        self.push_bars(snapshot.pattern.bars)?;
        self.push_bpm(snapshot.pattern.bpm)?;
        self.sync_echo(&snapshot.pattern)?;
        self.clock.start()?;
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// Pauses the clock where it is; `play` picks up from the same step.
    pub fn pause(&mut self) -> Result<(), PipelineError> {
        self.ensure_live()?;
        self.clock.pause()?;
        self.set_state(PlaybackState::Paused);
        Ok(())
    }

    /// Back to step zero. If playing, keeps playing from there.
    pub fn reset_to_start(&mut self) -> Result<(), PipelineError> {
        self.ensure_live()?;
        let was_playing = self.state == PlaybackState::Playing;
        self.clock.reset()?;
        if was_playing && self.pattern.is_some() {
            self.clock.start()?;
        }
        Ok(())
    }

    /// Stops the clock and forgets the pattern. The graph stays up for the next `play`.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        self.ensure_live()?;
        self.clock.stop()?;
        self.clock.clear_step_listeners();
        self.pattern = None;
        self.set_state(PlaybackState::Stopped);
        Ok(())
    }

    /// Swaps in a new pattern handle mid-playback, forwarding tempo and length
    /// changes to the clock. Everything else is read live on each step anyway.
    pub fn update_sequence(&mut self, pattern: PatternHandle) -> Result<(), PipelineError> {
        self.ensure_live()?;
        if self.pattern.is_none() {
            return Ok(());
        }
        let next = pattern.load();
        self.pattern = Some(pattern);
        self.push_bpm(next.pattern.bpm)?;
        self.push_bars(next.pattern.bars)?;
        Ok(())
    }

    pub fn set_echo_level(&mut self, level: f32) -> Result<(), PipelineError> {
        let routing = self.routing.as_ref().ok_or(PipelineError::Disposed)?;
        routing.effects().echo_level().set(&mut self.graph, level.clamp(0.0, 1.0))?;
        Ok(())
    }

    pub fn set_echo_feedback(&mut self, feedback: f32) -> Result<(), PipelineError> {
        let routing = self.routing.as_ref().ok_or(PipelineError::Disposed)?;
        routing.effects().echo_feedback().set(&mut self.graph, feedback.clamp(0.0, 1.0))?;
        Ok(())
    }

    pub fn set_reverb_level(&mut self, level: f32) -> Result<(), PipelineError> {
        let routing = self.routing.as_ref().ok_or(PipelineError::Disposed)?;
        routing.effects().reverb_level().set(&mut self.graph, level.clamp(0.0, 1.0))?;
        Ok(())
    }

    /// Send amount for one track; only with per-track routing.
    pub fn set_track_send(&mut self, track: TrackId, level: f32) -> Result<(), PipelineError> {
        let routing = self.routing.as_ref().ok_or(PipelineError::Disposed)?;
        let Routing::PerTrack(router) = routing else {
            return Err(PipelineError::NoTrackRouting);
        };
        let send = router.send_level(track).ok_or(PipelineError::UnknownTrack(track))?;
        send.set(&mut self.graph, level)?;
        Ok(())
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.state
    }

    pub fn samples(&self) -> &Arc<SampleMap> {
        &self.samples
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Last echo delay set from the tempo, in seconds.
    pub fn echo_delay(&self) -> Option<f32> {
        self.echo_delay
    }

    /// Hits handed to the engine since the pipeline was built.
    pub fn scheduled_hits(&self) -> u64 {
        self.scheduled_hits
    }

    /// Notes the engine had to play late because the look-ahead was too short.
    pub fn late_notes(&self) -> u64 {
        self.clock.late_triggers()
    }

    pub fn clock_state(&mut self) -> Result<StateRequest, PipelineError> {
        self.ensure_live()?;
        Ok(self.clock.state()?)
    }

    pub fn subscribe(&mut self, kind: PipelineEventKind, handler: impl FnMut(&PipelineEvent) + 'static) -> SubscriptionId {
        self.events.subscribe(kind, handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Handles every step event that has arrived since the last call. Returns
    /// how many there were.
    pub fn pump(&mut self) -> usize {
        if self.audio.is_none() {
            return 0;
        }
        let steps = self.clock.poll();
        for ev in &steps {
            self.handle_step(ev);
        }
        steps.len()
    }

    /// Tears everything down. The pipeline refuses all further work.
    pub fn dispose(&mut self) {
        let Some(audio) = &self.audio else {
            return;
        };
        let live = audio.is_live();
        if let Some(routing) = self.routing.take() {
            // a live stream stops with its handle below, before it could read the teardown
            if !live {
                if let Err(err) = routing.teardown(&mut self.graph) {
                    log::warn!("effects teardown incomplete: {err}");
                }
            }
        }
        self.clock.dispose();
        self.pattern = None;
        self.set_state(PlaybackState::Stopped);
        self.events.clear();
        self.audio = None;
        log::info!("pipeline disposed");
    }

    fn ensure_live(&self) -> Result<(), PipelineError> {
        if self.audio.is_none() { Err(PipelineError::Disposed) } else { Ok(()) }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            log::info!("playback {} -> {}", self.state.label(), state.label());
            self.state = state;
            self.events.emit(PipelineEvent::PlaybackStateChanged(state));
        }
    }

    fn push_bpm(&mut self, bpm: f64) -> Result<(), PipelineError> {
        let bpm = shared::clamp_bpm(bpm);
        if bpm != self.clock_bpm {
            self.clock.set_bpm(bpm)?;
            self.clock_bpm = bpm;
        }
        Ok(())
    }

    fn push_bars(&mut self, bars: u32) -> Result<(), PipelineError> {
        if bars != self.clock_bars {
            self.clock.set_num_bars(bars)?;
            self.clock_bars = bars;
        }
        Ok(())
    }

    // an eighth note's worth of echo, following the tempo
    fn sync_echo(&mut self, pattern: &Pattern) -> Result<(), PipelineError> {
        let beat_unit = pattern.time_signature.beat_unit.max(1) as f64;
        let delay = (120.0 / (shared::clamp_bpm(pattern.bpm) * beat_unit)) as f32;
        if self.echo_delay != Some(delay) {
            if let Some(routing) = &self.routing {
                routing.effects().echo_delay_time().set(&mut self.graph, delay)?;
            }
            self.echo_delay = Some(delay);
        }
        Ok(())
    }

    fn handle_step(&mut self, ev: &StepEvent) {
        let Some(handle) = &self.pattern else {
            return;
        };
        let snapshot = handle.load();
        let pattern = &snapshot.pattern;

        if let Err(err) = self.push_bpm(pattern.bpm).and_then(|_| self.sync_echo(pattern)) {
            log::warn!("tempo sync on step {} failed: {err}", ev.global_step);
        }

        self.events.emit(PipelineEvent::StepUpdated(*ev));

        let index = ev.pattern_index();
        debug_assert!(
            pattern.is_well_formed(ev.subdivisions),
            "pattern has {} steps, clock expects {}",
            pattern.notes.len(),
            pattern.expected_len(ev.subdivisions)
        );
        let hits = pattern.notes_at(index);
        if hits.is_empty() {
            return;
        }

        let start_time = hit_start_time(ev, pattern, self.config.lookahead_secs);

        let (Some(audio), Some(routing)) = (&self.audio, &self.routing) else {
            return;
        };
        for hit in hits {
            let sent = audio.send(AudioCommand::Trigger(TriggerParams {
                track: hit.sample.track,
                start_time,
                gain: hit.gain(),
                dest: routing.dest_for(hit.sample.track),
            }));
            if sent {
                self.scheduled_hits += 1;
            }
        }
    }
}

/// When the hits on `ev` should sound: the step's due time pushed out by the
/// look-ahead, plus swing if the step falls on an odd sixteenth.
fn hit_start_time(ev: &StepEvent, pattern: &Pattern, lookahead: f64) -> f64 {
    let beat_duration = 60.0 / shared::clamp_bpm(pattern.bpm);
    let sixteenth = timing::sixteenth_position(ev.pattern_index(), ev.subdivisions);
    ev.scheduled_time + lookahead + timing::swing_offset(sixteenth, beat_duration, pattern.swing)
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixture::{Harness, SAMPLE_RATE};
    use super::*;
    use crate::audio_api::EngineEvent;
    use crate::error::PatternError;
    use crate::pattern::Hit;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn record_steps(h: &mut Harness) -> Rc<RefCell<Vec<StepEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        h.pipeline.subscribe(PipelineEventKind::StepUpdated, move |ev| {
            if let PipelineEvent::StepUpdated(step) = ev {
                sink.borrow_mut().push(*step);
            }
        });
        seen
    }

    #[test]
    fn one_loop_schedules_every_hit_on_time() {
        let mut h = Harness::new();
        let steps = record_steps(&mut h);
        let handle = h.breakbeat();
        h.pipeline.play(handle, None).unwrap();
        h.run_for(1.95);

        assert_eq!(steps.borrow().len(), 16);
        assert_eq!(h.pipeline.scheduled_hits(), 19);
        h.render_for(0.1);
        assert_eq!(h.renderer.engine().stats().triggers, 19);
        assert_eq!(h.renderer.engine().stats().late_triggers, 0);
        assert!(h.renderer.peak() > 0.0);
        assert_eq!(h.pipeline.echo_delay(), Some(0.25));
    }

    #[test]
    fn reset_during_playback_restarts_at_zero() {
        let mut h = Harness::new();
        let steps = record_steps(&mut h);
        h.pipeline.play(h.breakbeat(), None).unwrap();
        h.run_for(0.7);
        let before = steps.borrow().len();
        assert!(before >= 5);

        h.pipeline.reset_to_start().unwrap();
        assert_eq!(h.pipeline.playback_state(), PlaybackState::Playing);
        h.run_for(0.3);
        let steps = steps.borrow();
        let next = &steps[before];
        assert_eq!(next.global_step, 0);
        assert_eq!((next.step_index, next.beat_index, next.bar_index), (0, 0, 0));
    }

    #[test]
    fn step_in_flight_across_a_reset_is_ignored() {
        let mut h = Harness::new();
        let steps = record_steps(&mut h);
        let handle = h.breakbeat();
        h.pipeline.play(handle.clone(), None).unwrap();
        h.run_for(0.7);
        let before = steps.borrow().len();
        let last = steps.borrow()[before - 1];

        h.pipeline.reset_to_start().unwrap();
        // the render thread emitted one more step before it saw the reset
        let stale = StepEvent { global_step: last.global_step + 1, ..last };
        h.link.event_tx.send(EngineEvent::Step(stale)).unwrap();
        let hits_at_reset = h.pipeline.scheduled_hits();
        h.run_for(0.3);

        let steps = steps.borrow();
        let after: Vec<u64> = steps[before..].iter().map(|s| s.global_step).collect();
        assert_eq!(after, vec![0, 1, 2]);
        let pattern = &handle.load().pattern;
        let expected: usize = steps[before..].iter().map(|s| pattern.notes_at(s.pattern_index()).len()).sum();
        assert_eq!(h.pipeline.scheduled_hits() - hits_at_reset, expected as u64);
    }

    #[test]
    fn stop_then_play_ignores_steps_from_the_old_run() {
        let mut h = Harness::new();
        let steps = record_steps(&mut h);
        h.pipeline.play(h.breakbeat(), None).unwrap();
        h.run_for(0.4);
        let before = steps.borrow().len();
        let last = steps.borrow()[before - 1];

        h.pipeline.stop().unwrap();
        h.pipeline.play(h.breakbeat(), None).unwrap();
        h.link.event_tx.send(EngineEvent::Step(StepEvent { global_step: last.global_step + 1, ..last })).unwrap();
        h.run_for(0.2);
        assert_eq!(steps.borrow()[before].global_step, 0);
        assert!(steps.borrow()[before..].iter().all(|s| s.epoch > last.epoch));
    }

    #[test]
    fn pause_then_play_resumes_position() {
        let mut h = Harness::new();
        let steps = record_steps(&mut h);
        let handle = h.breakbeat();
        h.pipeline.play(handle.clone(), None).unwrap();
        h.run_for(1.3);
        h.pipeline.pause().unwrap();
        assert_eq!(h.pipeline.playback_state(), PlaybackState::Paused);
        h.run_for(0.05); // let the pause land and flush in-flight steps
        let at_pause = steps.borrow().len();
        let last = steps.borrow()[at_pause - 1].global_step;

        h.run_for(0.5);
        assert_eq!(steps.borrow().len(), at_pause);

        h.pipeline.play(handle, None).unwrap();
        h.run_for(0.2);
        assert_eq!(steps.borrow()[at_pause].global_step, last + 1);
    }

    #[test]
    fn stop_silences_the_step_feed() {
        let mut h = Harness::new();
        let steps = record_steps(&mut h);
        h.pipeline.play(h.breakbeat(), None).unwrap();
        h.run_for(0.5);
        h.pipeline.stop().unwrap();
        let (count, hits) = (steps.borrow().len(), h.pipeline.scheduled_hits());
        h.run_for(0.5);
        assert_eq!(steps.borrow().len(), count);
        assert_eq!(h.pipeline.scheduled_hits(), hits);
        assert_eq!(h.pipeline.playback_state(), PlaybackState::Stopped);

        // and a fresh play starts from the top
        h.pipeline.play(h.breakbeat(), None).unwrap();
        h.run_for(0.1);
        assert_eq!(steps.borrow()[count].global_step, 0);
    }

    #[test]
    fn live_tempo_edit_reaches_the_clock() {
        let mut h = Harness::new();
        let steps = record_steps(&mut h);
        let handle = h.breakbeat();
        h.pipeline.play(handle.clone(), None).unwrap();
        h.run_for(0.3);
        handle.update(|p| p.bpm = 240.0);
        h.run_for(0.5);

        let steps = steps.borrow();
        let gaps: Vec<f64> = steps.windows(2).map(|w| w[1].scheduled_time - w[0].scheduled_time).collect();
        assert!((gaps[0] - 0.125).abs() < 1e-9);
        assert!(gaps.last().is_some_and(|g| (g - 0.0625).abs() < 1e-9));
        assert_eq!(h.pipeline.echo_delay(), Some(0.125));
    }

    #[test]
    fn update_sequence_forwards_bars() {
        let mut h = Harness::new();
        let handle = h.breakbeat();
        h.pipeline.play(handle.clone(), None).unwrap();
        h.run_for(0.1);

        let longer = PatternHandle::new(Pattern::empty(2).with_bpm(100.0));
        h.pipeline.update_sequence(longer).unwrap();
        let req = h.pipeline.clock_state().unwrap();
        h.render_for(0.02);
        let state = req.try_take().unwrap();
        assert_eq!((state.num_bars, state.bpm), (2, 100.0));
        assert!(state.running);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_playback() {
        let mut h = Harness::new();
        h.pipeline.subscribe(PipelineEventKind::StepUpdated, |_| panic!("bad subscriber"));
        let steps = record_steps(&mut h);
        h.pipeline.play(h.breakbeat(), None).unwrap();
        // 10 steps: 0.0 .. 1.125 at 120 bpm
        h.run_for(1.2);
        assert_eq!(steps.borrow().len(), 10);

        let req = h.pipeline.clock_state().unwrap();
        h.render_for(0.02);
        assert!(req.try_take().is_some_and(|s| s.running));
    }

    #[test]
    fn step_callback_sees_every_step() {
        let mut h = Harness::new();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        h.pipeline.play(h.breakbeat(), Some(Box::new(move |_| *c.borrow_mut() += 1))).unwrap();
        h.run_for(0.45);
        assert_eq!(*count.borrow(), 4);
    }

    #[test]
    fn replaying_drops_the_old_step_callback() {
        let mut h = Harness::new();
        let first = Rc::new(RefCell::new(0));
        let second = Rc::new(RefCell::new(0));
        let (a, b) = (first.clone(), second.clone());
        h.pipeline.play(h.breakbeat(), Some(Box::new(move |_| *a.borrow_mut() += 1))).unwrap();
        h.run_for(0.2);
        let seen_by_first = *first.borrow();
        assert!(seen_by_first > 0);

        h.pipeline.play(h.breakbeat(), Some(Box::new(move |_| *b.borrow_mut() += 1))).unwrap();
        h.run_for(0.2);
        assert_eq!(*first.borrow(), seen_by_first);
        assert!(*second.borrow() > 0);

        h.pipeline.stop().unwrap();
        let seen_by_second = *second.borrow();
        h.pipeline.play(h.breakbeat(), None).unwrap();
        h.run_for(0.2);
        assert_eq!(*second.borrow(), seen_by_second);
    }

    // a 120 bpm, four-to-the-beat step as the clock would report it
    fn step_at(global_step: u64) -> StepEvent {
        StepEvent {
            global_step,
            global_beat: global_step / 4,
            scheduled_time: global_step as f64 * 0.125,
            actual_time: global_step as f64 * 0.125,
            deviation: 0.0,
            step_index: (global_step % 4) as u32,
            beat_index: ((global_step / 4) % 4) as u32,
            bar_index: 0,
            beats_per_bar: 4,
            num_bars: 1,
            subdivisions: 4,
            epoch: 1,
        }
    }

    #[test]
    fn hit_times_add_lookahead_and_swing() {
        let close = |a: f64, b: f64| (a - b).abs() < 1e-12;
        let straight = Pattern::empty(1).with_bpm(120.0).with_swing(0.5);
        assert!(close(hit_start_time(&step_at(0), &straight, 0.05), 0.05));
        assert!(close(hit_start_time(&step_at(1), &straight, 0.05), 0.175));

        // odd sixteenths move by (swing - 0.5) * 2 sixteenths, even ones stay put
        let swung = Pattern::empty(1).with_bpm(120.0).with_swing(0.75);
        assert!(close(hit_start_time(&step_at(1), &swung, 0.05), 0.2375));
        assert!(close(hit_start_time(&step_at(2), &swung, 0.05), 0.3));
        assert!(close(hit_start_time(&step_at(3), &swung, 0.05), 0.4875));

        let hard = Pattern::empty(1).with_bpm(120.0).with_swing(1.0);
        assert!(close(hit_start_time(&step_at(1), &hard, 0.1), 0.35));
        assert!(close(hit_start_time(&step_at(4), &hard, 0.1), 0.6));
    }

    #[test]
    fn swung_hits_reach_the_engine_at_their_frames() {
        let mut h = Harness::with_config(EngineConfig { lookahead_secs: 0.1, ..Harness::config() });
        let kick = h.kit.tracks[0].id;
        let sample = h.pipeline.samples().sample_ref(kick).unwrap();
        let pattern = Pattern::empty(1)
            .with_bpm(120.0)
            .with_swing(0.75)
            .with_hit(1, Hit::new(sample, 255.0))
            .with_hit(2, Hit::new(sample, 255.0));
        h.pipeline.play(PatternHandle::new(pattern), None).unwrap();
        // both triggers are in the engine, neither has started yet
        h.run_for(0.27);

        let sr = SAMPLE_RATE as f64;
        let mut starts: Vec<(TrackId, u64)> = h.renderer.engine().voice_starts().collect();
        starts.sort_by_key(|&(_, frame)| frame);
        let odd = ((0.125 + 0.1 + 0.0625) * sr).round() as u64;
        let even = ((0.25 + 0.1) * sr).round() as u64;
        assert_eq!(starts, vec![(kick, odd), (kick, even)]);
    }


    #[test]
    fn state_changes_are_reported_once() {
        let mut h = Harness::new();
        let states = Rc::new(RefCell::new(Vec::new()));
        let sink = states.clone();
        h.pipeline.subscribe(PipelineEventKind::PlaybackStateChanged, move |ev| {
            if let PipelineEvent::PlaybackStateChanged(s) = ev {
                sink.borrow_mut().push(*s);
            }
        });
        h.pipeline.play(h.breakbeat(), None).unwrap();
        h.pipeline.play(h.breakbeat(), None).unwrap();
        h.pipeline.pause().unwrap();
        h.pipeline.stop().unwrap();
        h.pipeline.stop().unwrap();
        assert_eq!(
            *states.borrow(),
            vec![PlaybackState::Playing, PlaybackState::Paused, PlaybackState::Stopped]
        );
    }

    #[test]
    fn too_short_lookahead_plays_late_instead_of_dropping() {
        let config = EngineConfig { lookahead_secs: 0.0, ..Harness::config() };
        let mut h = Harness::with_config(config);
        h.pipeline.play(h.breakbeat(), None).unwrap();
        h.run_for(1.0);
        let stats = h.renderer.engine().stats();
        assert!(stats.late_triggers > 0);
        // late notes still play
        assert!(stats.triggers >= stats.late_triggers);
        assert!(h.renderer.peak() > 0.0);
        assert!(h.pipeline.late_notes() > 0);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut h = Harness::new();
        let bad = PatternHandle::new(Pattern::empty(1).with_bpm(0.0));
        assert!(matches!(
            h.pipeline.play(bad, None),
            Err(PipelineError::Pattern(PatternError::InvalidBpm(_)))
        ));
        assert_eq!(h.pipeline.playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn track_sends_need_per_track_routing() {
        let mut plain = Harness::new();
        assert!(matches!(plain.pipeline.set_track_send(TrackId(0), 0.5), Err(PipelineError::NoTrackRouting)));

        let mut h = Harness::with_config(EngineConfig { routing: RoutingMode::PerTrackSends, ..Harness::config() });
        h.pipeline.set_track_send(TrackId(0), 0.5).unwrap();
        assert!(matches!(h.pipeline.set_track_send(TrackId(9), 0.5), Err(PipelineError::UnknownTrack(TrackId(9)))));
        h.pipeline.play(h.breakbeat(), None).unwrap();
        h.run_for(0.5);
        assert!(h.renderer.peak() > 0.0);
        assert_eq!(h.renderer.engine().stats().graph_rejects, 0);
    }

    #[test]
    fn dispose_is_terminal_and_repeatable() {
        let mut h = Harness::new();
        h.pipeline.play(h.breakbeat(), None).unwrap();
        h.run_for(0.2);
        h.pipeline.dispose();
        assert_eq!(h.pipeline.playback_state(), PlaybackState::Stopped);
        assert!(matches!(h.pipeline.play(h.breakbeat(), None), Err(PipelineError::Disposed)));
        assert!(matches!(h.pipeline.set_echo_level(0.5), Err(PipelineError::Disposed)));
        h.pipeline.dispose();
        assert_eq!(h.pipeline.pump(), 0);

        // the graph is back to just the destination once the teardown lands
        h.render_for(0.02);
        assert_eq!(h.renderer.engine().graph().node_count(), 1);
    }
}
