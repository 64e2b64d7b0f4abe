/// One subdivision tick of the transport.
///
/// The three indices are all derived from `global_step`, so they can't drift apart.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepEvent {
    pub global_step: u64,
    pub global_beat: u64,
    /// when the step was due
    pub scheduled_time: f64,
    /// when the render thread noticed it (frame granularity)
    pub actual_time: f64,
    pub deviation: f64,
    pub step_index: u32,
    pub beat_index: u32,
    pub bar_index: u32,
    pub beats_per_bar: u32,
    pub num_bars: u32,
    pub subdivisions: u32,
    /// transport run this step belongs to; see `ClockState::epoch`
    pub epoch: u64,
}

impl StepEvent {
    /// Position of this step in a pattern's flat note list.
    pub fn pattern_index(&self) -> usize {
        ((self.bar_index as usize * self.beats_per_bar as usize) + self.beat_index as usize)
            * self.subdivisions as usize
            + self.step_index as usize
    }
}

/// Snapshot of the transport, as reported by `ClockProxy::state`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockState {
    pub running: bool,
    pub paused: bool,
    pub step_count: u64,
    pub beat_count: u64,
    pub paused_step_count: u64,
    pub paused_beat_count: u64,
    pub next_event_time: f64,
    pub bpm: f64,
    pub beats_per_bar: u32,
    pub num_bars: u32,
    pub subdivisions: u32,
    /// how many times the transport has been started, stopped or reset
    pub epoch: u64,
}
