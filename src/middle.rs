// sits between the tui and the engine: owns the editable grid and the knob values,
// turns input events into pipeline calls, and builds the snapshot the view draws

use std::cell::Cell;
use std::rc::Rc;

use pocketseq::PlaybackPipeline;
use pocketseq::audio::SampleMap;
use pocketseq::error::PipelineError;
use pocketseq::pattern::Pattern;
use pocketseq::pipeline::{GridState, Kit, PatternHandle, PipelineEvent, PipelineEventKind, pattern_from_grid};
use pocketseq::shared::{self, PlaybackState};

const BPM_STEP: f64 = 1.0;
const SWING_STEP: f64 = 0.02;
const LEVEL_STEP: f32 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    Quit,
    Play,
    Pause,
    Stop,
    ResetToStart,
    NextTrack,
    ToggleStep(u8),
    AdjustBpm(f64),
    AdjustSwing(f64),
    AdjustEcho(f32),
    AdjustReverb(f32),
}

impl InputEvent {
    pub fn bpm(up: bool) -> Self {
        InputEvent::AdjustBpm(if up { BPM_STEP } else { -BPM_STEP })
    }

    pub fn swing(up: bool) -> Self {
        InputEvent::AdjustSwing(if up { SWING_STEP } else { -SWING_STEP })
    }

    pub fn echo(up: bool) -> Self {
        InputEvent::AdjustEcho(if up { LEVEL_STEP } else { -LEVEL_STEP })
    }

    pub fn reverb(up: bool) -> Self {
        InputEvent::AdjustReverb(if up { LEVEL_STEP } else { -LEVEL_STEP })
    }
}

/// Everything the view needs for one frame.
#[derive(Clone, Debug, Default)]
pub struct DisplayState {
    pub playback: PlaybackState,
    pub bpm: f64,
    pub swing: f64,
    pub echo_level: f32,
    pub reverb_level: f32,
    pub track_names: Vec<&'static str>,
    pub rows: Vec<Vec<u8>>,
    pub selected_track: usize,
    pub playhead: Option<usize>,
    pub late_notes: u64,
    pub status: String,
}

pub struct Middle {
    kit: Kit,
    grid: GridState,
    base: Pattern, // tempo and feel; notes come from the grid
    handle: PatternHandle,
    selected: usize,
    echo_level: f32,
    reverb_level: f32,
    playhead: Rc<Cell<Option<usize>>>,
    status: String,
}

impl Middle {
    pub fn new(kit: Kit, pipeline: &mut PlaybackPipeline) -> Self {
        let grid = GridState::breakbeat(&kit);
        let base = Pattern::default();
        let handle = PatternHandle::new(pattern_from_grid(&grid, &kit, pipeline.samples(), &base));

        let playhead = Rc::new(Cell::new(None));
        let steps = grid.steps().max(1);
        let ph = playhead.clone();
        pipeline.subscribe(PipelineEventKind::StepUpdated, move |ev| {
            if let PipelineEvent::StepUpdated(step) = ev {
                ph.set(Some(step.pattern_index() % steps));
            }
        });
        let ph = playhead.clone();
        pipeline.subscribe(PipelineEventKind::PlaybackStateChanged, move |ev| {
            if let PipelineEvent::PlaybackStateChanged(PlaybackState::Stopped) = ev {
                ph.set(None);
            }
        });

        let config = pipeline.config();
        Self {
            echo_level: config.echo_level,
            reverb_level: config.reverb_level,
            kit,
            grid,
            base,
            handle,
            selected: 0,
            playhead,
            status: String::from("ready"),
        }
    }

    pub fn handle_input(&mut self, event: InputEvent, pipeline: &mut PlaybackPipeline) -> Result<(), PipelineError> {
        match event {
            InputEvent::Quit => {}
            InputEvent::Play => pipeline.play(self.handle.clone(), None)?,
            InputEvent::Pause => pipeline.pause()?,
            InputEvent::Stop => pipeline.stop()?,
            InputEvent::ResetToStart => {
                pipeline.reset_to_start()?;
                self.playhead.set(None);
            }
            InputEvent::NextTrack => self.selected = (self.selected + 1) % self.kit.len().max(1),
            InputEvent::ToggleStep(step) => {
                let value = self.grid.toggle(self.selected, step as usize);
                log::debug!("row {} step {step} -> {value}", self.selected);
                self.publish(pipeline.samples());
            }
            InputEvent::AdjustBpm(delta) => {
                let bpm = (self.base.bpm + delta).clamp(shared::UI_MIN_BPM, shared::UI_MAX_BPM);
                self.base.bpm = bpm;
                self.handle.update(|p| p.bpm = bpm);
            }
            InputEvent::AdjustSwing(delta) => {
                let swing = shared::clamp_swing(self.base.swing + delta);
                self.base.swing = swing;
                self.handle.update(|p| p.swing = swing);
            }
            InputEvent::AdjustEcho(delta) => {
                self.echo_level = (self.echo_level + delta).clamp(0.0, 1.0);
                pipeline.set_echo_level(self.echo_level)?;
            }
            InputEvent::AdjustReverb(delta) => {
                self.reverb_level = (self.reverb_level + delta).clamp(0.0, 1.0);
                pipeline.set_reverb_level(self.reverb_level)?;
            }
        }
        Ok(())
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn display_state(&self, pipeline: &PlaybackPipeline) -> DisplayState {
        let playback = pipeline.playback_state();
        DisplayState {
            playback,
            bpm: self.base.bpm,
            swing: self.base.swing,
            echo_level: self.echo_level,
            reverb_level: self.reverb_level,
            track_names: self.kit.tracks.iter().map(|t| t.name).collect(),
            rows: (0..self.grid.tracks()).map(|r| self.grid.row(r).to_vec()).collect(),
            selected_track: self.selected,
            playhead: if playback == PlaybackState::Stopped { None } else { self.playhead.get() },
            late_notes: pipeline.late_notes(),
            status: self.status.clone(),
        }
    }

    // the next step picks this up; nothing restarts
    fn publish(&self, samples: &SampleMap) {
        self.handle.store(pattern_from_grid(&self.grid, &self.kit, samples, &self.base));
    }
}
