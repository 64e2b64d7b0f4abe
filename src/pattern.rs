// The pattern the sequencer plays: a grid of hits plus its tempo and feel.
// Built fresh from the grid on every edit and swapped in whole (see PatternHandle).

use crate::error::PatternError;
use crate::shared::{self, TrackId};

/// Which sample a hit plays. `byte_len` is the size of the raw sample data; the
/// humanizer seeds from it so two tracks hitting on the same step drift differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleRef {
    pub track: TrackId,
    pub byte_len: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub sample: SampleRef,
    pub velocity: f32, // 0..255
}

impl Hit {
    pub fn new(sample: SampleRef, velocity: f32) -> Self {
        Self { sample, velocity }
    }

    /// Playback gain for this hit, `velocity / 255` clamped to [0, 1].
    pub fn gain(&self) -> f32 {
        (self.velocity / shared::MAX_VELOCITY).clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeSignature {
    pub beats_per_bar: u32,
    pub beat_unit: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { beats_per_bar: shared::DEFAULT_BEATS_PER_BAR, beat_unit: 4 }
    }
}

/// Humanize amounts, each in [0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Humanize {
    pub velocity: f64,
    pub timing: f64,
}

impl Humanize {
    pub fn is_off(&self) -> bool {
        self.velocity == 0.0 && self.timing == 0.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    /// one slot per step, each slot the hits that fire on it
    pub notes: Vec<Vec<Hit>>,
    pub bpm: f64,
    pub time_signature: TimeSignature,
    pub bars: u32,
    pub swing: f64,
    pub humanize: Option<Humanize>,
}

impl Default for Pattern {
    fn default() -> Self {
        Self::empty(1)
    }
}

impl Pattern {
    /// A silent pattern of `bars` bars in 4/4 at the default tempo.
    pub fn empty(bars: u32) -> Self {
        let bars = bars.max(1);
        let time_signature = TimeSignature::default();
        let len = (bars * time_signature.beats_per_bar * shared::SUBDIVISIONS_PER_BEAT) as usize;
        Self {
            notes: vec![Vec::new(); len],
            bpm: shared::DEFAULT_BPM,
            time_signature,
            bars,
            swing: shared::NO_SWING,
            humanize: None,
        }
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = bpm;
        self
    }

    pub fn with_swing(mut self, swing: f64) -> Self {
        self.swing = swing;
        self
    }

    pub fn with_humanize(mut self, humanize: Humanize) -> Self {
        self.humanize = Some(humanize);
        self
    }

    /// Adds a hit at `step`, growing nothing: out-of-range steps are ignored.
    pub fn with_hit(mut self, step: usize, hit: Hit) -> Self {
        if let Some(slot) = self.notes.get_mut(step) {
            slot.push(hit);
        }
        self
    }

    /// Number of step slots the grid should hold for a clock running at
    /// `subdivisions` steps per beat.
    pub fn expected_len(&self, subdivisions: u32) -> usize {
        (self.bars as usize) * (self.time_signature.beats_per_bar as usize) * (subdivisions as usize)
    }

    pub fn is_well_formed(&self, subdivisions: u32) -> bool {
        self.notes.len() == self.expected_len(subdivisions)
    }

    pub fn validate(&self) -> Result<(), PatternError> {
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(PatternError::InvalidBpm(self.bpm));
        }
        if !(shared::NO_SWING..=shared::MAX_SWING).contains(&self.swing) {
            return Err(PatternError::InvalidSwing(self.swing));
        }
        if self.bars == 0 {
            return Err(PatternError::ZeroBars);
        }
        if self.time_signature.beats_per_bar == 0 || self.time_signature.beat_unit == 0 {
            return Err(PatternError::InvalidTimeSignature(
                self.time_signature.beats_per_bar,
                self.time_signature.beat_unit,
            ));
        }
        let expected = self.expected_len(shared::SUBDIVISIONS_PER_BEAT);
        if self.notes.len() != expected {
            return Err(PatternError::ShapeMismatch { expected, actual: self.notes.len() });
        }
        Ok(())
    }

    /// Hits due at `index`; anything past the end of the grid has no notes.
    pub fn notes_at(&self, index: usize) -> &[Hit] {
        self.notes.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn hit_count(&self) -> usize {
        self.notes.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kick() -> SampleRef {
        SampleRef { track: TrackId(0), byte_len: 4096 }
    }

    #[test]
    fn empty_pattern_is_valid() {
        let p = Pattern::empty(2);
        assert_eq!(p.notes.len(), 32);
        assert!(p.validate().is_ok());
        assert!(p.is_well_formed(4));
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let mut p = Pattern::empty(1);
        p.notes.pop();
        match p.validate() {
            Err(PatternError::ShapeMismatch { expected, actual }) => {
                assert_eq!(expected, 16);
                assert_eq!(actual, 15);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_tempo_and_swing_rejected() {
        assert!(matches!(Pattern::empty(1).with_bpm(0.0).validate(), Err(PatternError::InvalidBpm(_))));
        assert!(matches!(Pattern::empty(1).with_swing(0.3).validate(), Err(PatternError::InvalidSwing(_))));
    }

    #[test]
    fn out_of_range_step_has_no_notes() {
        let p = Pattern::empty(1).with_hit(0, Hit::new(kick(), 255.0)).with_hit(99, Hit::new(kick(), 255.0));
        assert_eq!(p.notes_at(0).len(), 1);
        assert!(p.notes_at(99).is_empty());
        assert_eq!(p.hit_count(), 1);
    }

    #[test]
    fn gain_maps_velocity() {
        assert_eq!(Hit::new(kick(), 255.0).gain(), 1.0);
        assert_eq!(Hit::new(kick(), 300.0).gain(), 1.0);
        assert_eq!(Hit::new(kick(), -4.0).gain(), 0.0);
        assert!((Hit::new(kick(), 76.5).gain() - 0.3).abs() < 1e-6);
    }
}
