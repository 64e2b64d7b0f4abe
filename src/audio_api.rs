// Everything that crosses between the control thread and the render thread.
// Commands go down a bounded channel, events come back up another; nothing else is shared
// except the read-only sample map.

use std::sync::Arc;

use crossbeam_channel::Sender;

pub use crate::audio::graph::{GraphCommand, NodeId};
pub use crate::audio::SampleMap;
use crate::clock::{ClockState, StepEvent, StepListener};
use crate::error::GraphError;
use crate::shared::{ListenerId, TrackId};

/// Play one sample once, starting at an absolute render time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriggerParams {
    pub track: TrackId,
    pub start_time: f64, // seconds on the render clock
    pub gain: f32,
    pub dest: NodeId,
}

#[derive(Debug)]
pub enum ClockCommand {
    Start,
    Stop,
    Pause,
    Reset,
    SetBpm(f64),
    SetBeatsPerBar(u32),
    SetNumBars(u32),
    SetSubdivisions(u32),
    AddListener { id: ListenerId, listener: StepListener },
    RemoveListener(ListenerId),
    GetState { reply: Sender<ClockState> },
}

#[derive(Debug)]
pub enum AudioCommand {
    // The engine can't decode anything (that would stall the callback), so the
    // control side decodes once and hands over the finished, read-only map.
    UseSamples(Arc<SampleMap>),
    Clock(ClockCommand),
    Graph(GraphCommand),
    Trigger(TriggerParams),
}

/// Render side -> control side.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    Step(StepEvent),
    ListenerAdded(ListenerId),
    /// the trigger was due `late_by` seconds before it arrived; it played now instead
    LateTrigger { track: TrackId, late_by: f64 },
    MissingSample(TrackId),
    GraphRejected(GraphError),
    /// running total of step listeners that panicked on the render thread
    ListenerPanicked { total: u64 },
}
