use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::clock::StepEvent;
use crate::shared::{self, PlaybackState, SubscriptionId};

/// What the pipeline tells the UI.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PipelineEvent {
    PlaybackStateChanged(PlaybackState),
    StepUpdated(StepEvent),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineEventKind {
    PlaybackStateChanged,
    StepUpdated,
}

impl PipelineEvent {
    pub fn kind(&self) -> PipelineEventKind {
        match self {
            PipelineEvent::PlaybackStateChanged(_) => PipelineEventKind::PlaybackStateChanged,
            PipelineEvent::StepUpdated(_) => PipelineEventKind::StepUpdated,
        }
    }
}

impl PipelineEventKind {
    pub fn name(self) -> &'static str {
        match self {
            PipelineEventKind::PlaybackStateChanged => "playback-state-changed",
            PipelineEventKind::StepUpdated => "step-updated",
        }
    }
}

type Handler = Box<dyn FnMut(&PipelineEvent)>;

/// Subscriber lists, one per event kind. Handlers run on the control thread, in
/// subscription order; one that panics is logged and skipped.
#[derive(Default)]
pub struct EventBus {
    state_changed: Vec<(SubscriptionId, Handler)>,
    step_updated: Vec<(SubscriptionId, Handler)>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("state_changed", &self.state_changed.len())
            .field("step_updated", &self.step_updated.len())
            .finish()
    }
}

impl EventBus {
    pub fn subscribe(&mut self, kind: PipelineEventKind, handler: impl FnMut(&PipelineEvent) + 'static) -> SubscriptionId {
        let id = shared::next_subscription_id();
        self.list_mut(kind).push((id, Box::new(handler)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.state_changed.len() + self.step_updated.len();
        self.state_changed.retain(|(sid, _)| *sid != id);
        self.step_updated.retain(|(sid, _)| *sid != id);
        before != self.state_changed.len() + self.step_updated.len()
    }

    pub fn subscriber_count(&self, kind: PipelineEventKind) -> usize {
        match kind {
            PipelineEventKind::PlaybackStateChanged => self.state_changed.len(),
            PipelineEventKind::StepUpdated => self.step_updated.len(),
        }
    }

    pub fn clear(&mut self) {
        self.state_changed.clear();
        self.step_updated.clear();
    }

    pub fn emit(&mut self, event: PipelineEvent) {
        let kind = event.kind();
        for (id, handler) in self.list_mut(kind).iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                log::error!("{} subscriber {id:?} panicked", kind.name());
            }
        }
    }

    fn list_mut(&mut self, kind: PipelineEventKind) -> &mut Vec<(SubscriptionId, Handler)> {
        match kind {
            PipelineEventKind::PlaybackStateChanged => &mut self.state_changed,
            PipelineEventKind::StepUpdated => &mut self.step_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn handlers_only_see_their_kind() {
        let mut bus = EventBus::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(PipelineEventKind::PlaybackStateChanged, move |ev| sink.borrow_mut().push(*ev));

        bus.emit(PipelineEvent::PlaybackStateChanged(PlaybackState::Playing));
        assert_eq!(*seen.borrow(), vec![PipelineEvent::PlaybackStateChanged(PlaybackState::Playing)]);
        assert_eq!(bus.subscriber_count(PipelineEventKind::StepUpdated), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut bus = EventBus::default();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        let id = bus.subscribe(PipelineEventKind::PlaybackStateChanged, move |_| *c.borrow_mut() += 1);
        bus.emit(PipelineEvent::PlaybackStateChanged(PlaybackState::Paused));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(PipelineEvent::PlaybackStateChanged(PlaybackState::Stopped));
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn panicking_handler_does_not_starve_the_rest() {
        let mut bus = EventBus::default();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        bus.subscribe(PipelineEventKind::PlaybackStateChanged, |_| panic!("boom"));
        bus.subscribe(PipelineEventKind::PlaybackStateChanged, move |_| *c.borrow_mut() += 1);
        for _ in 0..3 {
            bus.emit(PipelineEvent::PlaybackStateChanged(PlaybackState::Playing));
        }
        assert_eq!(*count.borrow(), 3);
    }

    #[test]
    fn kind_names() {
        assert_eq!(PipelineEventKind::StepUpdated.name(), "step-updated");
        assert_eq!(PipelineEventKind::PlaybackStateChanged.name(), "playback-state-changed");
    }
}
