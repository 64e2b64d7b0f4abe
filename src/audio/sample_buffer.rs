use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use super::frame::StereoFrame;
use crate::error::LoadError;
use crate::pattern::SampleRef;
use crate::shared::TrackId;

#[derive(Clone, Debug, Default)]
pub struct SampleBuffer {
    pub data: Vec<StereoFrame>, // always at the engine's rate
}

impl SampleBuffer {
    pub fn from_frames(data: Vec<StereoFrame>) -> Self {
        Self { data }
    }

    /// Decodes a WAV held in memory and resamples it to `target_rate`.
    pub fn decode_wav(bytes: &[u8], target_rate: u32, track: TrackId) -> Result<Self, LoadError> {
        let wav_err = |source| LoadError::Wav { track, source };
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(wav_err)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>().map_err(wav_err)?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(LoadError::UnsupportedFormat(track));
                }
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|x| x as f32 / max))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(wav_err)?
            }
        };

        // extra channels beyond the first two are dropped
        let channels = spec.channels.max(1) as usize;
        let frames: Vec<StereoFrame> = if channels == 1 {
            samples.into_iter().map(StereoFrame::mono).collect()
        } else {
            samples
                .chunks_exact(channels)
                .map(|c| StereoFrame { left: c[0], right: c[1] })
                .collect()
        };
        if frames.is_empty() {
            return Err(LoadError::Empty(track));
        }

        Ok(Self { data: resample_linear(&frames, spec.sample_rate, target_rate) })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn duration(&self, sample_rate: u32) -> f64 {
        self.data.len() as f64 / sample_rate as f64
    }
}

#[derive(Clone, Debug)]
pub struct SampleEntry {
    pub buffer: Arc<SampleBuffer>,
    /// size of the encoded source; notes carry it as a seed for humanizing
    pub byte_len: usize,
}

/// Decoded samples by track. Built on the control side, read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct SampleMap {
    entries: HashMap<TrackId, SampleEntry>,
}

impl SampleMap {
    pub fn insert(&mut self, track: TrackId, buffer: SampleBuffer, byte_len: usize) {
        self.entries.insert(track, SampleEntry { buffer: Arc::new(buffer), byte_len });
    }

    pub fn get(&self, track: TrackId) -> Option<&SampleEntry> {
        self.entries.get(&track)
    }

    pub fn sample_ref(&self, track: TrackId) -> Option<SampleRef> {
        self.entries.get(&track).map(|e| SampleRef { track, byte_len: e.byte_len })
    }

    pub fn tracks(&self) -> impl Iterator<Item = TrackId> + '_ {
        let mut ids: Vec<TrackId> = self.entries.keys().copied().collect();
        ids.sort();
        ids.into_iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) fn resample_linear(frames: &[StereoFrame], source_rate: u32, target_rate: u32) -> Vec<StereoFrame> {
    if source_rate == target_rate || source_rate == 0 {
        return frames.to_vec();
    }
    let ratio = target_rate as f64 / source_rate as f64;
    let out_len = (frames.len() as f64 * ratio).ceil() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;
        if idx >= frames.len().saturating_sub(1) {
            out.push(frames.last().copied().unwrap_or_default());
        } else {
            let (a, b) = (frames[idx], frames[idx + 1]);
            out.push(a * (1.0 - frac) + b * frac);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let mut w = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in samples {
            w.write_sample(*s).unwrap();
        }
        w.finalize().unwrap();
        cursor.into_inner()
    }

    fn spec(channels: u16, rate: u32) -> hound::WavSpec {
        hound::WavSpec { channels, sample_rate: rate, bits_per_sample: 16, sample_format: hound::SampleFormat::Int }
    }

    #[test]
    fn mono_int_is_duplicated_to_both_sides() {
        let bytes = wav_bytes(spec(1, 1000), &[16384, -16384]);
        let buf = SampleBuffer::decode_wav(&bytes, 1000, TrackId(0)).unwrap();
        assert_eq!(buf.data, vec![StereoFrame::mono(0.5), StereoFrame::mono(-0.5)]);
    }

    #[test]
    fn stereo_keeps_channels() {
        let bytes = wav_bytes(spec(2, 1000), &[16384, 0]);
        let buf = SampleBuffer::decode_wav(&bytes, 1000, TrackId(0)).unwrap();
        assert_eq!(buf.data, vec![StereoFrame { left: 0.5, right: 0.0 }]);
    }

    #[test]
    fn resamples_to_target_rate() {
        let bytes = wav_bytes(spec(1, 1000), &[0; 100]);
        let buf = SampleBuffer::decode_wav(&bytes, 2000, TrackId(0)).unwrap();
        assert_eq!(buf.len(), 200);
        assert!((buf.duration(2000) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn garbage_and_empty_are_errors() {
        assert!(matches!(
            SampleBuffer::decode_wav(b"not a wav", 1000, TrackId(3)),
            Err(LoadError::Wav { track: TrackId(3), .. })
        ));
        let bytes = wav_bytes(spec(1, 1000), &[]);
        assert!(matches!(SampleBuffer::decode_wav(&bytes, 1000, TrackId(1)), Err(LoadError::Empty(_))));
    }

    #[test]
    fn map_lists_tracks_in_order() {
        let mut map = SampleMap::default();
        map.insert(TrackId(2), SampleBuffer::default(), 10);
        map.insert(TrackId(0), SampleBuffer::default(), 20);
        assert_eq!(map.tracks().collect::<Vec<_>>(), vec![TrackId(0), TrackId(2)]);
        assert_eq!(map.sample_ref(TrackId(0)), Some(SampleRef { track: TrackId(0), byte_len: 20 }));
        assert_eq!(map.sample_ref(TrackId(1)), None);
    }
}
