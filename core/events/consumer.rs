use super::event::Event;
use crate::sync::Arc;
use crossbeam::deque::{Injector, Worker};

/// The receiving end of an `EventChannel`.
///
/// Events are moved from the shared channel into a local queue with `fetch`, and then read one
/// at a time with `pop`.
///
pub struct EventConsumer {
    channel: Arc<Injector<Event>>,
    queue: Worker<Event>,
}

impl EventConsumer {
    pub fn new(channel: Arc<Injector<Event>>, queue: Worker<Event>) -> Self {
        Self { channel, queue }
    }

    pub fn fetch(&self) {
        while self.channel.steal_batch(&self.queue).is_retry() {}
    }

    pub fn pop(&self) -> Option<Event> {
        self.queue.pop()
    }

    /// Fetch and pop everything that is currently available.
    pub fn drain(&self) -> Vec<Event> {
        let mut events = vec![];
        loop {
            self.fetch();
            match self.pop() {
                Some(event) => events.push(event),
                None if self.channel.is_empty() => break,
                None => continue,
            }
        }
        events
    }

    pub fn is_empty(&self) -> bool {
        self.fetch();
        self.queue.is_empty()
    }
}

impl Iterator for &EventConsumer {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.pop()
    }
}
