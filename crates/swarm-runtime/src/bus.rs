//! In-process event bus.
//!
//! A bounded broadcast channel. Publishers never block; a subscriber that
//! falls more than the backlog behind loses the overwritten events and
//! sees a `subscriber_lagged` warning on its next receive. Ordering holds
//! per publisher only. Events are not persisted.

use swarm_core::swarm_bus;
use swarm_core::{Event, EventKind};
use tokio::sync::broadcast;

/// Cloneable publishing handle.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(backlog: usize) -> Self {
        let (sender, _) = broadcast::channel(backlog.max(1));
        Self { sender }
    }

    /// Publish an event. A bus with no subscribers swallows it.
    pub fn publish(&self, event: Event) {
        swarm_bus!(trace, kind = ?event.kind, "publish");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One subscriber's view of the bus.
pub struct EventStream {
    receiver: broadcast::Receiver<Event>,
}

impl EventStream {
    /// Next event. Lag is reported and skipped over rather than surfaced
    /// as an error; `None` means the bus is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    swarm_bus!(warn, missed, "subscriber_lagged: dropping events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain whatever is immediately available.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    swarm_bus!(warn, missed, "subscriber_lagged: dropping events");
                }
                Err(_) => break,
            }
        }
        events
    }

    /// Collect events until the bus closes or `kind` arrives; used by
    /// observers waiting for a terminal marker.
    pub async fn recv_until(&mut self, kind: EventKind) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let done = event.kind == kind;
            events.push(event);
            if done {
                break;
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe_in_order() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe();

        bus.publish(Event::task_log("t1", "first"));
        bus.publish(Event::task_log("t1", "second"));

        let first = stream.recv().await.unwrap();
        let second = stream.recv().await.unwrap();
        assert_eq!(first.data["message"], "first");
        assert_eq!(second.data["message"], "second");
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = EventBus::new(4);
        let mut stream = bus.subscribe();

        for index in 0..10 {
            bus.publish(Event::task_log("t1", &format!("msg-{index}")));
        }

        // The first available event is no longer msg-0.
        let event = stream.recv().await.unwrap();
        assert_ne!(event.data["message"], "msg-0");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.publish(Event::task_log("t1", "nobody listens"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_drain() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe();
        bus.publish(Event::task_log("t1", "a"));
        bus.publish(Event::task_log("t1", "b"));

        let events = stream.drain();
        assert_eq!(events.len(), 2);
        assert!(stream.drain().is_empty());
    }
}
