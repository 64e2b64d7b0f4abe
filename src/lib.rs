//! A step-sequencer drum engine: a sample-accurate transport clock on the audio
//! thread, a control-side pipeline that turns steps into scheduled hits, and an
//! effects graph the hits play through.

pub mod audio;
pub mod audio_api;
pub mod clock;
pub mod config;
pub mod error;
pub mod loader;
pub mod pattern;
pub mod pipeline;
pub mod shared;
pub mod timing;

pub use config::EngineConfig;
pub use pipeline::PlaybackPipeline;
