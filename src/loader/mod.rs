pub mod sample_loader;
pub mod synth;

pub use sample_loader::{RawSample, SampleDecoder, WavDecoder, find_named_wav, index_wav_in_dir, read_raw};
pub use synth::Drum;
