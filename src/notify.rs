use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-coach broadcast of committed events, feeding the admin event stream.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a coach's events. Creates the channel if needed.
    pub fn subscribe(&self, coach_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(coach_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, coach_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&coach_id) {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::coach;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let c = coach("ali", (8, 0), (20, 0), 60);
        let mut rx = hub.subscribe(c.id);

        let event = Event::CoachUpdated { coach: c.clone() };
        hub.send(c.id, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_coaches_not_delivered() {
        let hub = NotifyHub::new();
        let a = coach("ali", (8, 0), (20, 0), 60);
        let b = coach("bo", (8, 0), (20, 0), 60);
        let mut rx = hub.subscribe(a.id);

        hub.send(b.id, &Event::CoachUpdated { coach: b.clone() });
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let c = coach("ali", (8, 0), (20, 0), 60);
        hub.send(c.id, &Event::CoachRegistered { coach: c.clone() });
    }
}
