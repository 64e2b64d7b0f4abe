use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::audio_api::{AudioCommand, ClockCommand, EngineEvent};
use crate::error::ClockError;
use crate::shared::{self, ListenerId};

use super::{ClockState, StepEvent, StepListener};

const INIT_POLL: Duration = Duration::from_millis(5);

/// The control side's ends of the engine channels.
#[derive(Clone, Debug)]
pub struct ClockLink {
    pub commands: Sender<AudioCommand>,
    pub events: Receiver<EngineEvent>,
    // handed to the render-side forwarder so step events come back here
    pub event_tx: Sender<EngineEvent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitStatus {
    Pending,
    Ready,
}

/// A clock state request in flight; the render side answers on its next block.
#[derive(Debug)]
pub struct StateRequest(Receiver<ClockState>);

impl StateRequest {
    pub fn try_take(&self) -> Option<ClockState> {
        self.0.try_recv().ok()
    }

    pub fn wait(&self, timeout: Duration) -> Result<ClockState, ClockError> {
        self.0.recv_timeout(timeout).map_err(|_| ClockError::StateUnavailable)
    }
}

type ControlListener = Box<dyn FnMut(&StepEvent)>;

/// Control-thread handle to the transport clock.
///
/// Commands are fire-and-forget; nothing here waits on the render thread except
/// the explicitly blocking `init_blocking` and `StateRequest::wait`. Step events
/// reach control-side listeners when [`poll`](Self::poll) drains the event channel.
///
/// The proxy counts the start, stop and reset commands it sends the same way the
/// clock counts the ones it receives. A step stamped with an older epoch was
/// emitted before the clock saw the latest of them and is dropped.
pub struct ClockProxy {
    link: Option<ClockLink>,
    forwarder: Option<ListenerId>,
    ready: bool,
    listeners: Vec<(ListenerId, ControlListener)>,
    pending: VecDeque<StepEvent>,
    epoch: u64,
    late_triggers: u64,
    bpm: f64,
    beats_per_bar: u32,
    num_bars: u32,
    subdivisions: u32,
}

impl ClockProxy {
    pub fn new(link: ClockLink) -> Self {
        Self {
            link: Some(link),
            forwarder: None,
            ready: false,
            listeners: Vec::new(),
            pending: VecDeque::new(),
            epoch: 0,
            late_triggers: 0,
            bpm: shared::DEFAULT_BPM,
            beats_per_bar: shared::DEFAULT_BEATS_PER_BAR,
            num_bars: 1,
            subdivisions: shared::SUBDIVISIONS_PER_BEAT,
        }
    }

    /// Registers the step forwarder on the render side, once. Calling again while
    /// the acknowledgement is outstanding just checks for it.
    pub fn init(&mut self) -> Result<InitStatus, ClockError> {
        if self.ready {
            return Ok(InitStatus::Ready);
        }
        let Some(link) = &self.link else {
            return Err(ClockError::Disconnected);
        };
        if self.forwarder.is_none() {
            let id = shared::next_listener_id();
            let tx = link.event_tx.clone();
            let listener = StepListener::new(move |ev| {
                let _ = tx.try_send(EngineEvent::Step(*ev));
            });
            self.send(ClockCommand::AddListener { id, listener })?;
            self.forwarder = Some(id);
            log::debug!("clock forwarder {id:?} registered");
        }
        self.drain();
        Ok(if self.ready { InitStatus::Ready } else { InitStatus::Pending })
    }

    /// `init`, then wait up to `timeout` for the render side to acknowledge.
    pub fn init_blocking(&mut self, timeout: Duration) -> Result<(), ClockError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.init()? == InitStatus::Ready {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClockError::InitTimeout(timeout));
            }
            let Some(link) = &self.link else {
                return Err(ClockError::Disconnected);
            };
            match link.events.recv_timeout(remaining.min(INIT_POLL)) {
                Ok(ev) => self.handle_event(ev),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(ClockError::Disconnected),
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Steps that arrived before the start still get handed out; a resumed
    /// clock carries on right after them.
    pub fn start(&mut self) -> Result<(), ClockError> {
        self.drain();
        self.send_transport(ClockCommand::Start)
    }

    pub fn stop(&mut self) -> Result<(), ClockError> {
        self.send_transport(ClockCommand::Stop)?;
        self.pending.clear();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), ClockError> {
        self.send(ClockCommand::Pause)
    }

    pub fn reset(&mut self) -> Result<(), ClockError> {
        self.send_transport(ClockCommand::Reset)?;
        self.pending.clear();
        Ok(())
    }

    /// Transport commands sent so far; steps from earlier epochs are stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&mut self) -> Result<StateRequest, ClockError> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.send(ClockCommand::GetState { reply })?;
        Ok(StateRequest(rx))
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), ClockError> {
        self.bpm = shared::clamp_bpm(bpm);
        self.send(ClockCommand::SetBpm(self.bpm))
    }

    pub fn set_beats_per_bar(&mut self, beats: u32) -> Result<(), ClockError> {
        self.beats_per_bar = beats.max(1);
        self.send(ClockCommand::SetBeatsPerBar(self.beats_per_bar))
    }

    pub fn set_num_bars(&mut self, bars: u32) -> Result<(), ClockError> {
        self.num_bars = bars.max(1);
        self.send(ClockCommand::SetNumBars(self.num_bars))
    }

    pub fn set_subdivisions(&mut self, subdivisions: u32) -> Result<(), ClockError> {
        self.subdivisions = subdivisions.max(1);
        self.send(ClockCommand::SetSubdivisions(self.subdivisions))
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub fn num_bars(&self) -> u32 {
        self.num_bars
    }

    pub fn subdivisions(&self) -> u32 {
        self.subdivisions
    }

    pub fn steps_per_bar(&self) -> u32 {
        self.beats_per_bar * self.subdivisions
    }

    /// Notes that played late since the proxy was created.
    pub fn late_triggers(&self) -> u64 {
        self.late_triggers
    }

    pub fn on_step(&mut self, f: impl FnMut(&StepEvent) + 'static) -> ListenerId {
        let id = shared::next_listener_id();
        self.listeners.push((id, Box::new(f)));
        id
    }

    pub fn clear_step_listeners(&mut self) {
        self.listeners.clear();
    }

    /// Drains the event channel, runs step listeners, and returns the steps in
    /// the order they were emitted.
    pub fn poll(&mut self) -> Vec<StepEvent> {
        self.drain();
        let steps: Vec<StepEvent> = self.pending.drain(..).collect();
        for ev in &steps {
            self.dispatch(ev);
        }
        steps
    }

    /// Unregisters the forwarder, drops every listener and lets go of the
    /// channels. Fine to call before init, and more than once.
    pub fn dispose(&mut self) {
        if let (Some(id), Some(_)) = (self.forwarder, &self.link) {
            let _ = self.send_transport(ClockCommand::Stop);
            let _ = self.send(ClockCommand::RemoveListener(id));
        }
        self.listeners.clear();
        self.pending.clear();
        self.forwarder = None;
        self.ready = false;
        self.link = None;
    }

    fn send(&self, cmd: ClockCommand) -> Result<(), ClockError> {
        let Some(link) = &self.link else {
            return Err(ClockError::NotInitialized);
        };
        match link.commands.try_send(AudioCommand::Clock(cmd)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::warn!("clock command dropped: queue full");
                Err(ClockError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("clock command dropped: render side gone");
                Err(ClockError::Disconnected)
            }
        }
    }

    // the clock bumps its epoch on the same commands, in the same order
    fn send_transport(&mut self, cmd: ClockCommand) -> Result<(), ClockError> {
        self.send(cmd)?;
        self.epoch += 1;
        Ok(())
    }

    fn drain(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        let events: Vec<EngineEvent> = link.events.try_iter().collect();
        for ev in events {
            self.handle_event(ev);
        }
    }

    fn handle_event(&mut self, ev: EngineEvent) {
        match ev {
            EngineEvent::Step(step) if step.epoch < self.epoch => {
                log::debug!("dropping step {} from epoch {} (now {})", step.global_step, step.epoch, self.epoch);
            }
            EngineEvent::Step(step) => self.pending.push_back(step),
            EngineEvent::ListenerAdded(id) => {
                if Some(id) == self.forwarder && !self.ready {
                    self.ready = true;
                    log::info!("clock ready");
                }
            }
            EngineEvent::LateTrigger { track, late_by } => {
                self.late_triggers += 1;
                log::warn!(
                    "note on {track} started {:.2} ms late; look-ahead too short",
                    late_by * 1000.0
                );
            }
            EngineEvent::MissingSample(track) => log::warn!("no sample loaded for {track}"),
            EngineEvent::GraphRejected(err) => log::warn!("graph command rejected: {err}"),
            EngineEvent::ListenerPanicked { total } => {
                log::error!("render-side step listener panicked ({total} so far)")
            }
        }
    }

    fn dispatch(&mut self, ev: &StepEvent) {
        for (id, listener) in self.listeners.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(ev))).is_err() {
                log::error!("step listener {id:?} panicked on step {}", ev.global_step);
            }
        }
    }
}
