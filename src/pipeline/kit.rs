// A drum kit (which tracks exist and how loud they hit by default) and the
// editable step grid that the UI toggles. The grid is turned into a Pattern on
// every edit and published through the PatternHandle.

use crate::audio::SampleMap;
use crate::pattern::{Hit, Pattern};
use crate::shared::{self, TrackId};

pub const GRID_OFF: u8 = 0;
pub const GRID_SOFT: u8 = 128;
pub const GRID_FULL: u8 = 255;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackDef {
    pub id: TrackId,
    pub name: &'static str,
    pub default_velocity: f32, // scales the grid value
}

#[derive(Clone, Debug, PartialEq)]
pub struct Kit {
    pub tracks: Vec<TrackDef>,
}

impl Default for Kit {
    fn default() -> Self {
        let def = |id, name, default_velocity| TrackDef { id: TrackId(id), name, default_velocity };
        Self {
            tracks: vec![def(0, "kick", 1.0), def(1, "snare", 1.0), def(2, "hat", 0.3), def(3, "clap", 0.3)],
        }
    }
}

impl Kit {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.iter().map(|t| t.id)
    }
}

/// One row of step values per kit track, in kit order. 0 is off; 128 and 255
/// are the two "on" strengths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridState {
    rows: Vec<Vec<u8>>,
    steps: usize,
}

impl GridState {
    pub fn new(tracks: usize, steps: usize) -> Self {
        Self { rows: vec![vec![GRID_OFF; steps]; tracks], steps }
    }

    /// The funky default: an Amen-flavoured break for kick/snare/hat/clap. Tracks
    /// the breakbeat doesn't know about start empty.
    pub fn breakbeat(kit: &Kit) -> Self {
        const KICK: [u8; 16] = [1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0];
        const SNARE: [u8; 16] = [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0];
        const HAT: [u8; 16] = [1, 0, 1, 0, 0, 0, 1, 1, 0, 1, 1, 0, 1, 0, 1, 0];
        const CLAP: [u8; 16] = [0, 0, 1, 0, 0, 1, 0, 0, 1, 0, 0, 1, 0, 1, 0, 1];

        let mut grid = Self::new(kit.len(), shared::STEPS_PER_PATTERN);
        for (row, def) in kit.tracks.iter().enumerate() {
            let pattern = match def.name {
                "kick" => &KICK,
                "snare" => &SNARE,
                "hat" => &HAT,
                "clap" => &CLAP,
                _ => continue,
            };
            grid.rows[row] = pattern.iter().map(|&on| if on == 1 { GRID_FULL } else { GRID_OFF }).collect();
        }
        grid
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn tracks(&self) -> usize {
        self.rows.len()
    }

    pub fn value(&self, row: usize, step: usize) -> u8 {
        self.rows.get(row).and_then(|r| r.get(step)).copied().unwrap_or(GRID_OFF)
    }

    pub fn set(&mut self, row: usize, step: usize, value: u8) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(step)) {
            *cell = value;
        }
    }

    /// Cycles a cell off -> full -> soft -> off and returns the new value.
    pub fn toggle(&mut self, row: usize, step: usize) -> u8 {
        let next = match self.value(row, step) {
            GRID_OFF => GRID_FULL,
            GRID_FULL => GRID_SOFT,
            _ => GRID_OFF,
        };
        self.set(row, step, next);
        next
    }

    pub fn row(&self, row: usize) -> &[u8] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Per-step hit lists for the grid. A hit's velocity is the track's default
/// velocity times the cell value; tracks with no loaded sample are skipped.
pub fn grid_to_notes(grid: &GridState, kit: &Kit, samples: &SampleMap) -> Vec<Vec<Hit>> {
    (0..grid.steps())
        .map(|step| {
            kit.tracks
                .iter()
                .enumerate()
                .filter_map(|(row, def)| {
                    let value = grid.value(row, step);
                    let velocity = def.default_velocity * f32::from(value);
                    if velocity <= 0.0 {
                        return None;
                    }
                    samples.sample_ref(def.id).map(|sample| Hit::new(sample, velocity))
                })
                .collect()
        })
        .collect()
}

/// A full pattern from the grid, keeping tempo and feel from `base`.
pub fn pattern_from_grid(grid: &GridState, kit: &Kit, samples: &SampleMap, base: &Pattern) -> Pattern {
    let steps_per_bar = (base.time_signature.beats_per_bar * shared::SUBDIVISIONS_PER_BEAT) as usize;
    let bars = grid.steps().div_ceil(steps_per_bar.max(1)).max(1) as u32;
    let mut notes = grid_to_notes(grid, kit, samples);
    notes.resize(bars as usize * steps_per_bar, Vec::new());
    Pattern { notes, bars, ..base.clone() }
}
