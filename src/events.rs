//! In-process event system.
//!
//! The engines publish domain events onto a broadcast bus instead of calling
//! their consumers directly; the notification fanout and the moderation gate
//! each hold their own subscription. Losing an event (no subscribers, lagged
//! receiver) degrades notifications/moderation latency but never ledger or
//! tag state, so emission is fire-and-forget.

use tokio::sync::broadcast;

use crate::models::ModerationStatus;

/// Events published by the core engines.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A group's weekly rotation was applied.
    TagRotated { group_id: String, new_tag: String },
    /// A post was recorded (ledger already updated).
    PostCreated {
        post_id: String,
        group_id: String,
        author_id: String,
        image_url: String,
    },
    /// A like was added or removed.
    LikeToggled {
        post_id: String,
        group_id: String,
        author_id: String,
        liker_id: String,
        liked: bool,
    },
    /// The moderation gate settled a post's verdict.
    PostModerated {
        post_id: String,
        group_id: String,
        status: ModerationStatus,
    },
}

/// One-to-many event broadcasting over `tokio::sync::broadcast`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events. Events emitted before subscription
    /// are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: AppEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!("Event dropped (no subscribers): {:?}", e.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_counts() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(AppEvent::TagRotated {
            group_id: "g1".to_string(),
            new_tag: "Golden hour".to_string(),
        });
        match rx.recv().await.unwrap() {
            AppEvent::TagRotated { group_id, new_tag } => {
                assert_eq!(group_id, "g1");
                assert_eq!(new_tag, "Golden hour");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(16);
        // Must not panic or error out
        bus.emit(AppEvent::PostModerated {
            post_id: "p1".to_string(),
            group_id: "g1".to_string(),
            status: ModerationStatus::Approved,
        });
    }
}
