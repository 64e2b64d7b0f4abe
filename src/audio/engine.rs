use std::sync::Arc;

use crossbeam_channel::Sender;

use super::frame::StereoFrame;
use super::graph::AudioGraph;
use super::sample_buffer::SampleMap;
use super::voice::Voice;
use crate::audio_api::{AudioCommand, ClockCommand, EngineEvent, TriggerParams};
use crate::clock::{ClockState, TransportClock};
use crate::shared::TrackId;

/// Counters kept on the render thread, readable from offline renders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub triggers: u64,
    pub late_triggers: u64,
    pub stolen: u64,
    pub missing: u64,
    pub graph_rejects: u64,
    pub listener_panics: u64,
}

/// Everything that runs inside the output callback: the clock, the graph and
/// the voice pool. Nothing in here allocates once the pool is built, apart from
/// what graph commands bring along.
pub struct Engine {
    sample_rate: u32,
    frames_rendered: u64,
    clock: TransportClock,
    graph: AudioGraph,
    samples: Option<Arc<SampleMap>>,
    voices: Vec<Voice>, // fixed pool, sized once
    events: Sender<EngineEvent>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(sample_rate: u32, max_voices: usize, events: Sender<EngineEvent>) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            clock: TransportClock::default(),
            graph: AudioGraph::new(sample_rate),
            samples: None,
            voices: (0..max_voices.max(1)).map(|_| Voice::idle()).collect(),
            events,
            stats: EngineStats::default(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds since the engine started, on the render clock.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn clock_state(&self) -> ClockState {
        self.clock.state()
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    /// Track and start frame of every voice that is playing or waiting to.
    pub fn voice_starts(&self) -> impl Iterator<Item = (TrackId, u64)> + '_ {
        self.voices.iter().filter(|v| v.active).map(|v| (v.track, v.start_frame))
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn handle_cmd(&mut self, cmd: AudioCommand) {
        match cmd {
            // the control side keeps its own clone, so the old map is never freed here
            AudioCommand::UseSamples(map) => self.samples = Some(map),
            AudioCommand::Clock(cmd) => self.handle_clock(cmd),
            AudioCommand::Graph(cmd) => {
                if let Err(err) = self.graph.apply(cmd) {
                    self.stats.graph_rejects += 1;
                    self.emit(EngineEvent::GraphRejected(err));
                }
            }
            AudioCommand::Trigger(t) => self.trigger_voice(t),
        }
    }

    fn handle_clock(&mut self, cmd: ClockCommand) {
        match cmd {
            ClockCommand::Start => self.clock.start(self.current_time()),
            ClockCommand::Stop => self.clock.stop(),
            ClockCommand::Pause => self.clock.pause(),
            ClockCommand::Reset => self.clock.reset(),
            ClockCommand::SetBpm(bpm) => self.clock.set_bpm(bpm),
            ClockCommand::SetBeatsPerBar(n) => self.clock.set_beats_per_bar(n),
            ClockCommand::SetNumBars(n) => self.clock.set_num_bars(n),
            ClockCommand::SetSubdivisions(n) => self.clock.set_subdivisions(n),
            ClockCommand::AddListener { id, listener } => {
                if self.clock.add_listener(id, listener) {
                    self.emit(EngineEvent::ListenerAdded(id));
                }
            }
            ClockCommand::RemoveListener(id) => self.clock.remove_listener(id),
            ClockCommand::GetState { reply } => {
                let _ = reply.try_send(self.clock.state());
            }
        }
    }

    fn trigger_voice(&mut self, t: TriggerParams) {
        let Some(entry) = self.samples.as_ref().and_then(|m| m.get(t.track)) else {
            self.stats.missing += 1;
            self.emit(EngineEvent::MissingSample(t.track));
            return;
        };
        let buffer = entry.buffer.clone();

        let sr = self.sample_rate as f64;
        let mut start_frame = (t.start_time.max(0.0) * sr).round() as u64;
        if start_frame < self.frames_rendered {
            // already in the past: play it now rather than drop it
            let late_by = self.current_time() - t.start_time;
            start_frame = self.frames_rendered;
            self.stats.late_triggers += 1;
            self.emit(EngineEvent::LateTrigger { track: t.track, late_by });
        }

        // free slot, else steal the oldest voice of the same drum, else the oldest overall
        let slot = match self.voices.iter().position(|v| !v.active) {
            Some(i) => i,
            None => {
                self.stats.stolen += 1;
                let oldest = |same_track: bool| {
                    self.voices
                        .iter()
                        .enumerate()
                        .filter(|(_, v)| !same_track || v.track == t.track)
                        .min_by_key(|(_, v)| v.start_frame)
                        .map(|(i, _)| i)
                };
                oldest(true).or_else(|| oldest(false)).unwrap_or(0)
            }
        };
        self.voices[slot] = Voice::new(t.track, buffer, start_frame, t.gain, t.dest);
        self.stats.triggers += 1;
    }

    pub fn render_block(&mut self, out: &mut [StereoFrame]) {
        let sr = self.sample_rate as f64;
        self.clock.process(self.current_time(), out.len(), sr);
        let panics = self.clock.listener_panics();
        if panics > self.stats.listener_panics {
            self.stats.listener_panics = panics;
            self.emit(EngineEvent::ListenerPanicked { total: panics });
        }

        for (i, frame) in out.iter_mut().enumerate() {
            let f = self.frames_rendered + i as u64;
            for v in self.voices.iter_mut() {
                if let Some(s) = v.next_frame(f) {
                    self.graph.inject(v.dest, s);
                }
            }
            *frame = self.graph.render_frame(f as f64 / sr);
        }
        self.frames_rendered += out.len() as u64;
    }

    fn emit(&self, ev: EngineEvent) {
        // a full event queue just loses the event; the callback can't wait
        let _ = self.events.try_send(ev);
    }
}
