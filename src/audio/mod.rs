use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::audio_api::{AudioCommand, EngineEvent};
use crate::clock::ClockLink;
use crate::config::EngineConfig;
use crate::error::AudioError;

mod engine;
mod frame;
pub mod graph;
mod sample_buffer;
mod voice;

pub use engine::{Engine, EngineStats};
pub use frame::StereoFrame;
pub use sample_buffer::{SampleBuffer, SampleEntry, SampleMap};

use graph::RemoteGraph;

/// The control side's grip on a running engine. Dropping it stops the stream.
pub struct AudioHandle {
    tx: Sender<AudioCommand>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    sample_rate: u32,
    next_node: Arc<AtomicU32>,
    _output_stream: Option<cpal::Stream>, // None when rendering offline
}

impl AudioHandle {
    /// Queues a command for the render thread. Returns false if it was dropped.
    pub fn send(&self, cmd: AudioCommand) -> bool {
        match self.tx.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("audio command dropped: queue full");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("audio command dropped: engine gone");
                false
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_live(&self) -> bool {
        self._output_stream.is_some()
    }

    pub fn clock_link(&self) -> ClockLink {
        ClockLink { commands: self.tx.clone(), events: self.events_rx.clone(), event_tx: self.events_tx.clone() }
    }

    pub fn remote_graph(&self) -> RemoteGraph {
        RemoteGraph::new(self.tx.clone(), self.sample_rate, self.next_node.clone())
    }
}

struct Channels {
    tx: Sender<AudioCommand>,
    rx: Receiver<AudioCommand>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
}

impl Channels {
    fn new(config: &EngineConfig) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(config.command_capacity);
        let (events_tx, events_rx) = crossbeam_channel::bounded(config.event_capacity);
        Self { tx, rx, events_tx, events_rx }
    }

    fn into_handle(self, sample_rate: u32, stream: Option<cpal::Stream>) -> AudioHandle {
        AudioHandle {
            tx: self.tx,
            events_tx: self.events_tx,
            events_rx: self.events_rx,
            sample_rate,
            // 0 is the destination, which every graph starts with
            next_node: Arc::new(AtomicU32::new(1)),
            _output_stream: stream,
        }
    }
}

/// Opens the default output device and starts rendering into it.
pub fn start_audio(config: &EngineConfig) -> Result<AudioHandle, AudioError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(AudioError::NoOutputDevice)?;
    let supported = device.default_output_config().map_err(|e| AudioError::DeviceConfig(e.to_string()))?;

    let sample_rate: u32 = supported.sample_rate();
    let channels = supported.channels() as usize;
    if sample_rate != config.sample_rate {
        log::info!("device runs at {sample_rate} Hz, not the configured {} Hz", config.sample_rate);
    }

    match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            let chans = Channels::new(config);
            let engine = Engine::new(sample_rate, config.max_voices, chans.events_tx.clone());
            let stream =
                build_output_stream_f32(&device, &supported.into(), chans.rx.clone(), engine, channels, config.block_size)?;
            stream.play().map_err(|e| AudioError::StreamPlay(e.to_string()))?;
            log::info!("audio started: {sample_rate} Hz, {channels} channels");
            Ok(chans.into_handle(sample_rate, Some(stream)))
        }
        other => Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
    }
}

fn build_output_stream_f32(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    rx: Receiver<AudioCommand>,
    mut engine: Engine,
    channels: usize,
    block_size: usize,
) -> Result<cpal::Stream, AudioError> {
    let mut scratch = vec![StereoFrame::zero(); block_size.max(1) * 8];
    let err_fn = |err| log::error!("audio output stream error: {err}");

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info| {
                while let Ok(cmd) = rx.try_recv() {
                    engine.handle_cmd(cmd);
                }

                let n_frames = data.len() / channels.max(1);
                if scratch.len() < n_frames {
                    // only when the host hands us a bigger buffer than ever before
                    scratch.resize(n_frames, StereoFrame::zero());
                }
                let frames = &mut scratch[..n_frames];
                engine.render_block(frames);
                interleave(frames, data, channels);
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamBuild(e.to_string()))
}

fn interleave(frames: &[StereoFrame], out: &mut [f32], channels: usize) {
    match channels {
        0 => {}
        1 => {
            for (o, f) in out.iter_mut().zip(frames) {
                *o = 0.5 * (f.left + f.right);
            }
        }
        n => {
            for (chunk, f) in out.chunks_exact_mut(n).zip(frames) {
                chunk[0] = f.left;
                chunk[1] = f.right;
                chunk[2..].fill(0.0);
            }
        }
    }
}

/// Drives an [`Engine`] by hand instead of from a device callback. Used by the
/// tests and anywhere a render without hardware is wanted.
pub struct OfflineRenderer {
    engine: Engine,
    rx: Receiver<AudioCommand>,
    block: Vec<StereoFrame>,
    peak: f32,
}

impl OfflineRenderer {
    /// Drains pending commands, then renders one block.
    pub fn render_block(&mut self) -> &[StereoFrame] {
        while let Ok(cmd) = self.rx.try_recv() {
            self.engine.handle_cmd(cmd);
        }
        self.engine.render_block(&mut self.block);
        let block_peak = self.block.iter().fold(0.0f32, |p, f| p.max(f.peak()));
        self.peak = self.peak.max(block_peak);
        &self.block
    }

    /// Renders whole blocks until at least `secs` seconds have passed.
    pub fn render_for(&mut self, secs: f64) {
        let end = self.current_time() + secs;
        while self.current_time() < end {
            self.render_block();
        }
    }

    pub fn current_time(&self) -> f64 {
        self.engine.current_time()
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

pub fn start_offline(config: &EngineConfig) -> (AudioHandle, OfflineRenderer) {
    let chans = Channels::new(config);
    let engine = Engine::new(config.sample_rate, config.max_voices, chans.events_tx.clone());
    let rx = chans.rx.clone();
    let handle = chans.into_handle(config.sample_rate, None);
    let renderer = OfflineRenderer { engine, rx, block: vec![StereoFrame::zero(); config.block_size.max(1)], peak: 0.0 };
    (handle, renderer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_api::TriggerParams;
    use crate::shared::TrackId;
    use graph::NodeId;

    #[test]
    fn interleave_fills_extra_channels_with_silence() {
        let frames = [StereoFrame { left: 1.0, right: -1.0 }];
        let mut out = [9.0f32; 4];
        interleave(&frames, &mut out, 4);
        assert_eq!(out, [1.0, -1.0, 0.0, 0.0]);
        let mut mono = [9.0f32; 1];
        interleave(&frames, &mut mono, 1);
        assert_eq!(mono, [0.0]);
    }

    #[test]
    fn offline_render_plays_queued_trigger() {
        let config = EngineConfig { sample_rate: 1000, block_size: 16, ..EngineConfig::default() };
        let (handle, mut r) = start_offline(&config);
        assert!(!handle.is_live());

        let mut map = SampleMap::default();
        map.insert(TrackId(1), SampleBuffer::from_frames(vec![StereoFrame::mono(0.5); 8]), 100);
        assert!(handle.send(AudioCommand::UseSamples(Arc::new(map))));
        handle.send(AudioCommand::Trigger(TriggerParams {
            track: TrackId(1),
            start_time: 0.020,
            gain: 1.0,
            dest: NodeId::DESTINATION,
        }));
        r.render_for(0.1);
        assert!(r.current_time() >= 0.1);
        assert_eq!(r.peak(), 0.5);
        assert_eq!(r.engine().stats().triggers, 1);
    }
}
