//! Server-side push of event changes to connected real-time sessions.

use std::sync::Arc;

use agenda_core::models::{DeletedEvent, Event, PushMessage, Visibility};
use agenda_core::util::user_fingerprint;
use agenda_core::UserId;
use tokio::sync::broadcast;

/// One change, tagged with what receivers need to decide delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutEnvelope {
    pub owner_id: UserId,
    pub visibility: Visibility,
    pub message: PushMessage,
}

impl FanoutEnvelope {
    /// Owners always see their own changes. Other sessions only see public
    /// events, and only when they asked for the broadcast scope.
    pub fn is_visible_to(&self, user_id: UserId, scope: DeliveryScope) -> bool {
        if self.owner_id == user_id {
            return true;
        }
        scope == DeliveryScope::All && self.visibility.is_public()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryScope {
    /// Per-user group: only the caller's own events
    User,
    #[default]
    All,
}

#[derive(Clone)]
pub struct NotificationFanout {
    sender: broadcast::Sender<Arc<FanoutEnvelope>>,
}

impl NotificationFanout {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<FanoutEnvelope>> {
        self.sender.subscribe()
    }

    pub fn connected_sessions(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn created(&self, event: &Event) {
        self.publish(event.owner_id, event.visibility, PushMessage::Created(event.clone()));
    }

    pub fn updated(&self, event: &Event) {
        self.publish(event.owner_id, event.visibility, PushMessage::Updated(event.clone()));
    }

    pub fn deleted(&self, event: &Event) {
        self.publish(
            event.owner_id,
            event.visibility,
            PushMessage::Deleted(DeletedEvent {
                id: event.id,
                title: event.title.clone(),
            }),
        );
    }

    /// Deliver-or-log: a send with no live receivers is not an error for the
    /// request that caused it.
    fn publish(&self, owner_id: UserId, visibility: Visibility, message: PushMessage) {
        let event_id = message.event_id();
        let envelope = Arc::new(FanoutEnvelope {
            owner_id,
            visibility,
            message,
        });
        match self.sender.send(envelope) {
            Ok(receivers) => tracing::debug!(
                event_id = %event_id,
                user = user_fingerprint(owner_id),
                receivers,
                "Fanned out event change"
            ),
            Err(_) => tracing::debug!(event_id = %event_id, "No real-time sessions connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use agenda_core::models::{EventDraft, EventId};

    fn event(owner_id: UserId, visibility: Visibility) -> Event {
        let mut draft = EventDraft::new(
            "Standup",
            Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap(),
        );
        draft.visibility = visibility;
        Event::from_draft(EventId::new(7), owner_id, draft, 1_000)
    }

    #[test]
    fn visibility_rules_follow_owner_and_scope() {
        let private = FanoutEnvelope {
            owner_id: 1,
            visibility: Visibility::Private,
            message: PushMessage::Created(event(1, Visibility::Private)),
        };
        assert!(private.is_visible_to(1, DeliveryScope::User));
        assert!(!private.is_visible_to(2, DeliveryScope::All));

        let public = FanoutEnvelope {
            owner_id: 1,
            visibility: Visibility::Public,
            message: PushMessage::Created(event(1, Visibility::Public)),
        };
        assert!(public.is_visible_to(2, DeliveryScope::All));
        assert!(!public.is_visible_to(2, DeliveryScope::User));
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let fanout = NotificationFanout::new(16);
        let mut first = fanout.subscribe();
        let mut second = fanout.subscribe();
        assert_eq!(fanout.connected_sessions(), 2);

        let event = event(1, Visibility::Private);
        fanout.deleted(&event);

        let expected = PushMessage::Deleted(DeletedEvent {
            id: event.id,
            title: "Standup".to_string(),
        });
        assert_eq!(first.recv().await.unwrap().message, expected);
        assert_eq!(second.recv().await.unwrap().message, expected);
    }

    #[test]
    fn publish_without_sessions_is_silent() {
        let fanout = NotificationFanout::new(16);
        fanout.created(&event(1, Visibility::Public));
        assert_eq!(fanout.connected_sessions(), 0);
    }
}
