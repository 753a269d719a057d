//! Realtime change notifications for admin views.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::lead::LeadKind;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    LeadsChanged {
        company_id: Uuid,
        kind: Option<LeadKind>,
        action: ChangeAction,
    },
    SubscriptionChanged {
        email: String,
    },
}

/// Fan-out of [`RealtimeEvent`]s. Delivery is best effort: with no
/// subscribers an event is simply dropped, and slow subscribers may lag.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: RealtimeEvent) {
        let receivers = self.tx.send(event).unwrap_or(0);
        tracing::debug!(receivers, "Realtime event published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(RealtimeEvent::SubscriptionChanged {
            email: "owner@example.com".into(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            RealtimeEvent::SubscriptionChanged {
                email: "owner@example.com".into()
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.publish(RealtimeEvent::LeadsChanged {
            company_id: Uuid::nil(),
            kind: None,
            action: ChangeAction::Delete,
        });
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(RealtimeEvent::LeadsChanged {
            company_id: Uuid::nil(),
            kind: Some(LeadKind::Contact),
            action: ChangeAction::Insert,
        })
        .unwrap();
        assert_eq!(json["event"], "leads_changed");
        assert_eq!(json["kind"], "contact");
        assert_eq!(json["action"], "insert");
    }
}
