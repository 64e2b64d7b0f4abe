// Offline rig for pipeline tests: a synthesized kit, an engine rendered by hand,
// and a pipeline wired to it. `run_for` interleaves rendering and pumping the
// way the demo's tick loop does, one block at a time.

use crate::audio::{OfflineRenderer, start_offline};
use crate::clock::ClockLink;
use crate::config::EngineConfig;
use crate::loader::{Drum, RawSample, WavDecoder, synth};
use crate::pattern::Pattern;

use super::{GridState, Kit, PatternHandle, PlaybackPipeline, pattern_from_grid};

pub const SAMPLE_RATE: u32 = 8000;

pub struct Harness {
    pub pipeline: PlaybackPipeline,
    pub renderer: OfflineRenderer,
    pub kit: Kit,
    /// the same channels the pipeline's clock uses, for playing the render side
    pub link: ClockLink,
}

impl Harness {
    pub fn config() -> EngineConfig {
        EngineConfig { sample_rate: SAMPLE_RATE, block_size: 128, ..EngineConfig::default() }
    }

    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let kit = Kit::default();
        let sources: Vec<RawSample> = kit
            .tracks
            .iter()
            .map(|def| {
                let drum = Drum::from_name(def.name).unwrap();
                RawSample::new(def.id, synth::drum_wav(drum, SAMPLE_RATE).unwrap())
            })
            .collect();
        let impulse = RawSample::new(crate::shared::TrackId(u8::MAX), synth::impulse_wav(SAMPLE_RATE, 0.25).unwrap());

        let (audio, renderer) = start_offline(&config);
        let link = audio.clock_link();
        let pipeline = PlaybackPipeline::new(audio, &sources, &impulse, &WavDecoder, config).unwrap();
        Self { pipeline, renderer, kit, link }
    }

    /// The default break at 120 bpm, straight.
    pub fn breakbeat(&self) -> PatternHandle {
        let grid = GridState::breakbeat(&self.kit);
        PatternHandle::new(pattern_from_grid(&grid, &self.kit, self.pipeline.samples(), &Pattern::default()))
    }

    /// Render and pump block by block for `secs` of render time.
    pub fn run_for(&mut self, secs: f64) {
        let end = self.renderer.current_time() + secs;
        while self.renderer.current_time() < end {
            self.renderer.render_block();
            self.pipeline.pump();
        }
    }

    /// Render without pumping the control side.
    pub fn render_for(&mut self, secs: f64) {
        self.renderer.render_for(secs);
    }
}
