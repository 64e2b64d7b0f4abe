//! Uniformly partitioned FFT convolution (overlap-save).
//!
//! Input is collected into blocks of `PARTITION` frames. Each full block is
//! transformed once and multiplied against every impulse partition through a
//! frequency-domain delay line, so a block costs one forward and one inverse FFT
//! no matter how long the impulse is. Output lags input by one partition.
//!
//! Everything is allocated in [`Convolver::new`]; [`Convolver::process`] only
//! touches preallocated buffers, so the node can be built on the control thread
//! and shipped to the render thread.

use std::fmt;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::audio::frame::StereoFrame;

pub const PARTITION: usize = 128;

// loudness calibration matching what browsers do for a normalized convolver
const GAIN_CALIBRATION: f32 = 0.001_25;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44_100.0;
const MIN_POWER: f32 = 0.000_125;

struct Channel {
    // impulse partitions, each a 2*PARTITION spectrum
    filters: Vec<Vec<Complex<f32>>>,
    // past input spectra, newest at `head`
    history: Vec<Vec<Complex<f32>>>,
    // previous block followed by the current one
    window: Vec<f32>,
    accum: Vec<Complex<f32>>,
    output: Vec<f32>,
}

pub struct Convolver {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    channels: [Channel; 2],
    head: usize,
    fill: usize, // frames written into the current block
    scale: f32,
}

impl fmt::Debug for Convolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Convolver")
            .field("partitions", &self.channels[0].filters.len())
            .field("scale", &self.scale)
            .finish()
    }
}

impl Convolver {
    /// `normalize` scales the impulse by its RMS power so quiet and loud
    /// responses come out at a similar level.
    pub fn new(impulse: &[StereoFrame], sample_rate: u32, normalize: bool) -> Self {
        let n = 2 * PARTITION;
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(n);
        let inverse = planner.plan_fft_inverse(n);
        let scratch_len = forward.get_inplace_scratch_len().max(inverse.get_inplace_scratch_len());
        let mut scratch = vec![Complex::default(); scratch_len];

        let scale = if normalize { normalization_scale(impulse, sample_rate) } else { 1.0 };
        let partitions = impulse.len().div_ceil(PARTITION).max(1);

        let mut build = |pick: fn(&StereoFrame) -> f32| -> Channel {
            let filters = (0..partitions)
                .map(|p| {
                    let mut spectrum = vec![Complex::default(); n];
                    let chunk = impulse.iter().skip(p * PARTITION).take(PARTITION);
                    for (slot, frame) in spectrum.iter_mut().zip(chunk) {
                        slot.re = pick(frame) * scale;
                    }
                    forward.process_with_scratch(&mut spectrum, &mut scratch);
                    spectrum
                })
                .collect();
            Channel {
                filters,
                history: vec![vec![Complex::default(); n]; partitions],
                window: vec![0.0; n],
                accum: vec![Complex::default(); n],
                output: vec![0.0; PARTITION],
            }
        };
        let channels = [build(|f| f.left), build(|f| f.right)];

        Self { forward, inverse, scratch, channels, head: 0, fill: 0, scale }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Pushes one input frame and returns one output frame, `PARTITION` frames late.
    pub fn process(&mut self, input: StereoFrame) -> StereoFrame {
        let out = StereoFrame {
            left: self.channels[0].output[self.fill],
            right: self.channels[1].output[self.fill],
        };
        self.channels[0].window[PARTITION + self.fill] = input.left;
        self.channels[1].window[PARTITION + self.fill] = input.right;
        self.fill += 1;
        if self.fill == PARTITION {
            self.fill = 0;
            self.run_block();
        }
        out
    }

    fn run_block(&mut self) {
        let n = 2 * PARTITION;
        let partitions = self.channels[0].filters.len();
        self.head = (self.head + 1) % partitions;
        let norm = 1.0 / n as f32;

        for ch in &mut self.channels {
            let spectrum = &mut ch.history[self.head];
            for (slot, &x) in spectrum.iter_mut().zip(&ch.window) {
                *slot = Complex::new(x, 0.0);
            }
            self.forward.process_with_scratch(spectrum, &mut self.scratch);

            ch.accum.fill(Complex::default());
            for (p, filter) in ch.filters.iter().enumerate() {
                let past = &ch.history[(self.head + partitions - p) % partitions];
                for ((acc, x), h) in ch.accum.iter_mut().zip(past).zip(filter) {
                    *acc += x * h;
                }
            }
            self.inverse.process_with_scratch(&mut ch.accum, &mut self.scratch);

            // overlap-save: the second half is the valid linear convolution
            for (out, y) in ch.output.iter_mut().zip(&ch.accum[PARTITION..]) {
                *out = y.re * norm;
            }
            ch.window.copy_within(PARTITION.., 0);
        }
    }
}

fn normalization_scale(impulse: &[StereoFrame], sample_rate: u32) -> f32 {
    if impulse.is_empty() {
        return 1.0;
    }
    let energy: f32 = impulse.iter().map(|f| f.left * f.left + f.right * f.right).sum();
    let mut power = (energy / (2.0 * impulse.len() as f32)).sqrt();
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }
    let mut scale = GAIN_CALIBRATION / power;
    if sample_rate > 0 {
        scale *= GAIN_CALIBRATION_SAMPLE_RATE / sample_rate as f32;
    }
    scale
}
