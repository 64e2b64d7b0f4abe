use std::path::{Path, PathBuf};

use crate::audio::{SampleBuffer, SampleMap};
use crate::error::LoadError;
use crate::shared::TrackId;

/// Undecoded sample data for one track, as a provider hands it over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSample {
    pub id: TrackId,
    pub bytes: Vec<u8>,
}

impl RawSample {
    pub fn new(id: TrackId, bytes: Vec<u8>) -> Self {
        Self { id, bytes }
    }
}

/// Turns raw bytes into frames at the engine rate.
pub trait SampleDecoder {
    fn decode(&self, raw: &RawSample, target_rate: u32) -> Result<SampleBuffer, LoadError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WavDecoder;

impl SampleDecoder for WavDecoder {
    fn decode(&self, raw: &RawSample, target_rate: u32) -> Result<SampleBuffer, LoadError> {
        SampleBuffer::decode_wav(&raw.bytes, target_rate, raw.id)
    }
}

impl SampleMap {
    /// Decodes every sample up front. One bad sample fails the whole map.
    pub fn decode(raw: &[RawSample], decoder: &dyn SampleDecoder, target_rate: u32) -> Result<Self, LoadError> {
        let mut map = SampleMap::default();
        for sample in raw {
            let buffer = decoder.decode(sample, target_rate)?;
            log::debug!("decoded {}: {} frames", sample.id, buffer.len());
            map.insert(sample.id, buffer, sample.bytes.len());
        }
        Ok(map)
    }
}

pub fn read_raw(id: TrackId, path: &Path) -> Result<RawSample, LoadError> {
    Ok(RawSample { id, bytes: std::fs::read(path)? })
}

// list all .wav files in a directory, sorted by name
pub fn index_wav_in_dir(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_wav(p))
        .collect();
    paths.sort();
    Ok(paths)
}

/// First `.wav` in `dir` whose file stem matches `name`, ignoring case.
pub fn find_named_wav(dir: &Path, name: &str) -> Option<PathBuf> {
    index_wav_in_dir(dir).ok()?.into_iter().find(|p| {
        p.file_stem().and_then(|s| s.to_str()).is_some_and(|stem| stem.eq_ignore_ascii_case(name))
    })
}

fn is_wav(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("wav"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::synth::{self, Drum};

    #[test]
    fn decode_builds_map_with_byte_lengths() {
        let kick = synth::drum_wav(Drum::Kick, 8000).unwrap();
        let hat = synth::drum_wav(Drum::Hat, 8000).unwrap();
        let (kick_len, hat_len) = (kick.len(), hat.len());
        let raw = vec![RawSample::new(TrackId(0), kick), RawSample::new(TrackId(2), hat)];
        let map = SampleMap::decode(&raw, &WavDecoder, 8000).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.sample_ref(TrackId(0)).map(|r| r.byte_len), Some(kick_len));
        assert_eq!(map.get(TrackId(2)).map(|e| e.byte_len), Some(hat_len));
        assert!(map.get(TrackId(0)).is_some_and(|e| !e.buffer.is_empty()));
    }

    #[test]
    fn one_bad_sample_fails_the_map() {
        let raw = vec![RawSample::new(TrackId(1), b"RIFF....".to_vec())];
        assert!(matches!(
            SampleMap::decode(&raw, &WavDecoder, 8000),
            Err(LoadError::Wav { track: TrackId(1), .. })
        ));
    }

    #[test]
    fn finds_wavs_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Kick.WAV"), synth::drum_wav(Drum::Kick, 8000).unwrap()).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        std::fs::write(dir.path().join("a_snare.wav"), b"x").unwrap();

        let all = index_wav_in_dir(dir.path()).unwrap();
        assert_eq!(all.len(), 2);
        let kick = find_named_wav(dir.path(), "kick").unwrap();
        let raw = read_raw(TrackId(0), &kick).unwrap();
        assert!(WavDecoder.decode(&raw, 8000).is_ok());
        assert!(find_named_wav(dir.path(), "clap").is_none());
    }
}
