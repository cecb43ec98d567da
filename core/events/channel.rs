use super::event::Event;
use super::EventConsumer;
use crate::sync::Arc;
use crossbeam::deque::{Injector, Worker};

/// A multi-producer queue of `Event`s.
///
/// Producers (jobs, the registry, the queue, the cache and the scheduler) never block on it. A
/// consumer pulls events in batches, so whoever presents jobs to a user does so at its own pace.
///
#[derive(Clone, Debug, Default)]
pub struct EventChannel {
    bus: Arc<Injector<Event>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bus.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bus.len()
    }

    pub fn send<E>(&self, event: E)
    where
        E: Into<Event>,
    {
        let event = event.into();
        tracing::trace!("{:?}", event);
        self.bus.push(event)
    }

    pub fn consumer(&self) -> EventConsumer {
        EventConsumer::new(self.bus.clone(), Worker::new_fifo())
    }
}
