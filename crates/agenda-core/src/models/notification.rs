//! Real-time push messages

use serde::{Deserialize, Serialize};

use super::event::{Event, EventId};

/// Marker pushed when an event is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedEvent {
    pub id: EventId,
    pub title: String,
}

/// A message on the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushMessage {
    Created(Event),
    Updated(Event),
    Deleted(DeletedEvent),
}

impl PushMessage {
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::Created(event) | Self::Updated(event) => event.id,
            Self::Deleted(deleted) => deleted.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_wire_format() {
        let message = PushMessage::Deleted(DeletedEvent {
            id: EventId::new(10),
            title: "Standup".to_string(),
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "deleted");
        assert_eq!(json["data"]["id"], 10);
        assert_eq!(json["data"]["title"], "Standup");
        assert_eq!(message.event_id(), EventId::new(10));
    }
}
