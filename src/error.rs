use std::time::Duration;

use thiserror::Error;

use crate::audio::graph::{NodeId, ParamId};
use crate::shared::TrackId;

/// Output device and stream failures. All of these happen at init; the caller
/// can retry on the next user gesture.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no default output device")]
    NoOutputDevice,
    #[error("no usable output config: {0}")]
    DeviceConfig(String),
    #[error("unsupported sample format {0} (only f32 supported for now)")]
    UnsupportedFormat(String),
    #[error("failed to build output stream: {0}")]
    StreamBuild(String),
    #[error("failed to play output stream: {0}")]
    StreamPlay(String),
}

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("clock not initialized")]
    NotInitialized,
    #[error("clock did not come up within {0:?}")]
    InitTimeout(Duration),
    #[error("clock command queue full")]
    QueueFull,
    #[error("render side disconnected")]
    Disconnected,
    #[error("clock state request was not answered")]
    StateUnavailable,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("unknown param {0:?}")]
    UnknownParam(ParamId),
    #[error("graph command queue full")]
    QueueFull,
    #[error("render side disconnected")]
    Disconnected,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatternError {
    #[error("pattern has {actual} steps, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("invalid bpm {0}")]
    InvalidBpm(f64),
    #[error("swing {0} outside [0.5, 1.0]")]
    InvalidSwing(f64),
    #[error("pattern must have at least one bar")]
    ZeroBars,
    #[error("invalid time signature {0}/{1}")]
    InvalidTimeSignature(u32, u32),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("wav decode failed for {track}: {source}")]
    Wav { track: TrackId, source: hound::Error },
    #[error("unsupported sample format for {0}")]
    UnsupportedFormat(TrackId),
    #[error("sample for {0} has no audio")]
    Empty(TrackId),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline has been disposed")]
    Disposed,
    #[error("per-track sends are not enabled")]
    NoTrackRouting,
    #[error("no such track {0}")]
    UnknownTrack(TrackId),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Load(#[from] LoadError),
}
