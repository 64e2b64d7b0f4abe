// Tiny synthesized drum kit and reverb impulse, written out as WAV bytes so they
// go through the same decode path as samples loaded from disk.

use std::f32::consts::TAU;
use std::io::Cursor;

use crate::timing::SeededRng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drum {
    Kick,
    Snare,
    Hat,
    Clap,
}

impl Drum {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "kick" | "bd" => Some(Drum::Kick),
            "snare" | "sd" => Some(Drum::Snare),
            "hat" | "hihat" | "hh" => Some(Drum::Hat),
            "clap" | "cp" => Some(Drum::Clap),
            _ => None,
        }
    }

    fn length_secs(self) -> f32 {
        match self {
            Drum::Kick => 0.45,
            Drum::Snare => 0.25,
            Drum::Hat => 0.06,
            Drum::Clap => 0.3,
        }
    }
}

fn noise(rng: &SeededRng, i: usize) -> f32 {
    (rng.value(i as f64) * 2.0 - 1.0) as f32
}

fn render(drum: Drum, sample_rate: u32) -> Vec<f32> {
    let sr = sample_rate as f32;
    let n = (drum.length_secs() * sr) as usize;
    let rng = SeededRng::new(drum as u32 + 1);
    let mut phase = 0.0f32;
    let mut prev_noise = 0.0f32;

    (0..n)
        .map(|i| {
            let t = i as f32 / sr;
            match drum {
                Drum::Kick => {
                    // pitch sweep 150 -> 50 Hz
                    let freq = 50.0 + 100.0 * (-t * 30.0).exp();
                    phase = (phase + TAU * freq / sr) % TAU;
                    phase.sin() * (-t * 9.0).exp()
                }
                Drum::Snare => {
                    let tone = (TAU * 180.0 * t).sin() * (-t * 20.0).exp();
                    let rattle = noise(&rng, i) * (-t * 14.0).exp();
                    0.4 * tone + 0.6 * rattle
                }
                Drum::Hat => {
                    // first difference as a crude high-pass
                    let x = noise(&rng, i);
                    let hp = x - prev_noise;
                    prev_noise = x;
                    0.5 * hp * (-t * 60.0).exp()
                }
                Drum::Clap => {
                    // three quick bursts, then a tail
                    let burst = (t % 0.011) < 0.004 && t < 0.033;
                    let env = if burst { 1.0 } else { 0.6 * (-(t - 0.033).max(0.0) * 18.0).exp() };
                    noise(&rng, i) * env
                }
            }
        })
        .collect()
}

fn write_wav(spec: hound::WavSpec, samples: impl IntoIterator<Item = f32>) -> Result<Vec<u8>, hound::Error> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for s in samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// A mono 32-bit float WAV of one drum hit.
pub fn drum_wav(drum: Drum, sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec { channels: 1, sample_rate, bits_per_sample: 32, sample_format: hound::SampleFormat::Float };
    write_wav(spec, render(drum, sample_rate))
}

/// Stereo exponentially decaying noise, a stand-in room impulse.
pub fn impulse_wav(sample_rate: u32, secs: f32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec { channels: 2, sample_rate, bits_per_sample: 32, sample_format: hound::SampleFormat::Float };
    let n = (secs * sample_rate as f32) as usize;
    let (left, right) = (SeededRng::new(101), SeededRng::new(202));
    let decay = 6.9 / secs.max(1e-3); // about -60 dB at the end
    let samples = (0..n).flat_map(move |i| {
        let env = (-(i as f32 / sample_rate as f32) * decay).exp();
        [noise(&left, i) * env, noise(&right, i) * env]
    });
    write_wav(spec, samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleBuffer;
    use crate::shared::TrackId;

    #[test]
    fn every_drum_decodes_and_is_audible() {
        for drum in [Drum::Kick, Drum::Snare, Drum::Hat, Drum::Clap] {
            let bytes = drum_wav(drum, 8000).unwrap();
            let buf = SampleBuffer::decode_wav(&bytes, 8000, TrackId(0)).unwrap();
            assert_eq!(buf.len(), (drum.length_secs() * 8000.0) as usize);
            let peak = buf.data.iter().fold(0.0f32, |p, f| p.max(f.peak()));
            assert!(peak > 0.05 && peak <= 1.0, "{drum:?} peak {peak}");
        }
    }

    #[test]
    fn synthesis_is_deterministic() {
        assert_eq!(drum_wav(Drum::Snare, 8000).unwrap(), drum_wav(Drum::Snare, 8000).unwrap());
    }

    #[test]
    fn impulse_decays() {
        let bytes = impulse_wav(8000, 0.5).unwrap();
        let buf = SampleBuffer::decode_wav(&bytes, 8000, TrackId(9)).unwrap();
        assert_eq!(buf.len(), 4000);
        let head = buf.data[..400].iter().fold(0.0f32, |p, f| p.max(f.peak()));
        let tail = buf.data[3600..].iter().fold(0.0f32, |p, f| p.max(f.peak()));
        assert!(tail < head * 0.1);
    }

    #[test]
    fn names_map_to_drums() {
        assert_eq!(Drum::from_name("Kick"), Some(Drum::Kick));
        assert_eq!(Drum::from_name("hh"), Some(Drum::Hat));
        assert_eq!(Drum::from_name("cowbell"), None);
    }
}
