use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// What happened to a resource's reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReservationEvent {
    Booked { reservation_id: Ulid, resource_id: String },
    Cancelled { reservation_id: Ulid, resource_id: String },
    /// A compensating release gave up; the resource may be stuck Reserved.
    ReleaseFailed { resource_id: String, reason: String },
}

impl ReservationEvent {
    pub fn resource_id(&self) -> &str {
        match self {
            ReservationEvent::Booked { resource_id, .. }
            | ReservationEvent::Cancelled { resource_id, .. }
            | ReservationEvent::ReleaseFailed { resource_id, .. } => resource_id,
        }
    }
}

/// Broadcast hub for reservation events, one channel per resource.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<ReservationEvent>>,
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

    /// Subscribe to events for a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: &str) -> broadcast::Receiver<ReservationEvent> {
        let sender = self
            .channels
            .entry(resource_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, event: ReservationEvent) {
        if let Some(sender) = self.channels.get(event.resource_id()) {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("court-1");

        let event = ReservationEvent::Booked {
            reservation_id: Ulid::new(),
            resource_id: "court-1".into(),
        };
        hub.send(event.clone());

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn events_stay_on_their_resource() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe("court-1");
        hub.send(ReservationEvent::ReleaseFailed {
            resource_id: "court-2".into(),
            reason: "store down".into(),
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(ReservationEvent::Cancelled {
            reservation_id: Ulid::new(),
            resource_id: "court-1".into(),
        });
    }

    #[test]
    fn event_json_is_tagged() {
        let json = serde_json::to_value(ReservationEvent::ReleaseFailed {
            resource_id: "court-1".into(),
            reason: "timeout".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "release_failed");
        assert_eq!(json["resource_id"], "court-1");
    }
}
