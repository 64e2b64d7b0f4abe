use crate::audio::frame::StereoFrame;

use super::convolver::Convolver;
use super::param::AudioParam;

pub const MAX_DELAY_SECS: f32 = 2.0;

/// Ring buffer delay with a fractional, automatable read position.
#[derive(Clone, Debug)]
pub struct DelayLine {
    buf: Vec<StereoFrame>,
    write: usize,
    pub delay_time: AudioParam, // seconds
}

impl DelayLine {
    pub fn new(delay_secs: f32, max_secs: f32, sample_rate: u32) -> Self {
        let max_secs = max_secs.max(0.0);
        let len = (max_secs * sample_rate as f32).ceil() as usize + 2;
        Self {
            buf: vec![StereoFrame::zero(); len],
            write: 0,
            delay_time: AudioParam::new(delay_secs, 0.0, max_secs),
        }
    }

    pub fn process(&mut self, input: StereoFrame, time: f64, sample_rate: f32) -> StereoFrame {
        let len = self.buf.len();
        self.buf[self.write] = input;
        let delay = (self.delay_time.advance(time) * sample_rate).clamp(0.0, (len - 2) as f32);
        let whole = delay.floor();
        let frac = delay - whole;
        let i0 = (self.write + len - whole as usize) % len;
        let i1 = (i0 + len - 1) % len;
        self.write = (self.write + 1) % len;
        self.buf[i0] * (1.0 - frac) + self.buf[i1] * frac
    }
}

#[derive(Debug)]
pub enum NodeKind {
    /// where the graph's output is read; passes its input through
    Destination,
    Gain(AudioParam),
    Delay(DelayLine),
    Convolver(Box<Convolver>),
}

impl NodeKind {
    pub fn gain(value: f32) -> Self {
        NodeKind::Gain(AudioParam::gain(value))
    }

    pub fn delay(delay_secs: f32, max_secs: f32, sample_rate: u32) -> Self {
        NodeKind::Delay(DelayLine::new(delay_secs, max_secs, sample_rate))
    }

    pub fn convolver(impulse: &[StereoFrame], sample_rate: u32) -> Self {
        NodeKind::Convolver(Box::new(Convolver::new(impulse, sample_rate, true)))
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Destination => "destination",
            NodeKind::Gain(_) => "gain",
            NodeKind::Delay(_) => "delay",
            NodeKind::Convolver(_) => "convolver",
        }
    }

    /// Parameter `index` of this node; gain and delay each expose one.
    pub fn param_mut(&mut self, index: u8) -> Option<&mut AudioParam> {
        match (self, index) {
            (NodeKind::Gain(gain), 0) => Some(gain),
            (NodeKind::Delay(line), 0) => Some(&mut line.delay_time),
            _ => None,
        }
    }

    pub fn process(&mut self, input: StereoFrame, time: f64, sample_rate: f32) -> StereoFrame {
        match self {
            NodeKind::Destination => input,
            NodeKind::Gain(gain) => input * gain.advance(time),
            NodeKind::Delay(line) => line.process(input, time, sample_rate),
            NodeKind::Convolver(conv) => conv.process(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::graph::param::ParamEvent;

    #[test]
    fn delay_line_delays_by_whole_frames() {
        let sr = 1000;
        let mut d = DelayLine::new(0.01, 0.1, sr); // 10 frames
        let mut out = Vec::new();
        for i in 0..30 {
            let x = if i == 3 { StereoFrame::mono(1.0) } else { StereoFrame::zero() };
            out.push(d.process(x, i as f64 / sr as f64, sr as f32));
        }
        assert_eq!(out.iter().position(|f| f.left > 0.5), Some(13));
    }

    #[test]
    fn delay_time_is_clamped_to_buffer() {
        let mut d = DelayLine::new(0.01, 0.05, 1000);
        d.delay_time.apply(ParamEvent::SetValue(5.0), 0.0);
        assert_eq!(d.delay_time.value(), 0.05);
    }

    #[test]
    fn gain_node_scales() {
        let mut g = NodeKind::gain(0.5);
        let out = g.process(StereoFrame { left: 1.0, right: -1.0 }, 0.0, 44_100.0);
        assert_eq!(out, StereoFrame { left: 0.5, right: -0.5 });
        assert!(g.param_mut(0).is_some());
        assert!(g.param_mut(1).is_none());
    }
}
