use std::sync::Arc;

use super::frame::StereoFrame;
use super::graph::NodeId;
use super::sample_buffer::SampleBuffer;
use crate::shared::TrackId;

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// One playing sample. Voices are one-shot: once the buffer runs out the slot
/// is free again.
#[derive(Clone, Debug)]
pub struct Voice {
    pub track: TrackId,
    pub dest: NodeId,
    pub gain: f32,
    pub pitch: f32,
    pub active: bool,
    /// render frame the voice begins on; it's silent until then
    pub start_frame: u64,
    pos: f32,
    buffer: Arc<SampleBuffer>,
}

impl Voice {
    pub fn new(track: TrackId, buffer: Arc<SampleBuffer>, start_frame: u64, gain: f32, dest: NodeId) -> Self {
        Self { track, dest, gain, pitch: 1.0, active: !buffer.is_empty(), start_frame, pos: 0.0, buffer }
    }

    pub fn idle() -> Self {
        Self {
            track: TrackId(0),
            dest: NodeId::DESTINATION,
            gain: 0.0,
            pitch: 1.0,
            active: false,
            start_frame: 0,
            pos: 0.0,
            buffer: Arc::new(SampleBuffer::default()),
        }
    }

    /// The voice's output for render frame `frame`, or `None` if it isn't sounding.
    pub fn next_frame(&mut self, frame: u64) -> Option<StereoFrame> {
        if !self.active || frame < self.start_frame {
            return None;
        }
        let data = &self.buffer.data;
        let len = data.len();
        if self.pos >= len as f32 {
            self.active = false;
            return None;
        }

        let i = self.pos as usize;
        let frac = self.pos - i as f32;
        let s0 = data[i];
        let s1 = data.get(i + 1).copied().unwrap_or(s0);
        let sample = StereoFrame { left: lerp(s0.left, s1.left, frac), right: lerp(s0.right, s1.right, frac) };

        self.pos += self.pitch;
        if self.pos >= len as f32 {
            self.active = false;
        }
        Some(sample * self.gain)
    }
}
