//! Merge of optimistic local edits, REST responses and real-time pushes
//!
//! One table keyed by event id tracks what the client shows and why. Pushes
//! are matched against it so the client's own writes are not applied twice and
//! temporary ids never linger once the server id is known.

use std::collections::{BTreeMap, HashMap};

use crate::models::{DeletedEvent, Event, EventId, PushMessage};

/// Which of this client's writes is awaiting its echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Create,
    Update,
    Delete,
}

/// Per-id reconciliation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Created locally, not yet known to the server
    LocalOnly,
    /// This client wrote the event and has not seen the push for it yet
    PendingConfirmation(PendingKind),
    /// Matches the last known server state
    Confirmed,
}

#[derive(Debug, Clone)]
struct Entry {
    /// `None` while a local delete awaits confirmation
    event: Option<Event>,
    status: EntryStatus,
}

/// What a push did to the local view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// New event from elsewhere
    Inserted(Event),
    /// A temporary entry was swapped for its server id
    Replaced { temp_id: EventId, event: Event },
    /// Echo of this client's own write, applied silently
    Confirmed,
    /// Change made elsewhere, applied and worth surfacing
    Applied(Event),
    /// Deletion made elsewhere
    Removed(DeletedEvent),
    /// Duplicate or irrelevant push
    Ignored,
}

impl PushOutcome {
    /// Event rows the cache should now hold
    pub fn upserted(&self) -> Option<&Event> {
        match self {
            Self::Inserted(event) | Self::Applied(event) | Self::Replaced { event, .. } => {
                Some(event)
            }
            Self::Confirmed | Self::Removed(_) | Self::Ignored => None,
        }
    }
}

/// Local view state for one connected client.
#[derive(Debug, Default)]
pub struct ClientReconciler {
    entries: BTreeMap<EventId, Entry>,
    /// Temporary id to server id, for creates confirmed by replay
    temp_ids: HashMap<EventId, EventId>,
}

impl ClientReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from cached events. Temporary ids are local-only creates.
    pub fn seed(events: impl IntoIterator<Item = Event>) -> Self {
        let entries = events
            .into_iter()
            .map(|event| {
                let status = if event.id.is_temporary() {
                    EntryStatus::LocalOnly
                } else {
                    EntryStatus::Confirmed
                };
                (
                    event.id,
                    Entry {
                        event: Some(event),
                        status,
                    },
                )
            })
            .collect();
        Self {
            entries,
            temp_ids: HashMap::new(),
        }
    }

    /// Visible events ordered by start time
    pub fn events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .entries
            .values()
            .filter_map(|entry| entry.event.clone())
            .collect();
        events.sort_by(|a, b| a.start_at.cmp(&b.start_at).then(a.id.cmp(&b.id)));
        events
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.entries
            .get(&self.resolve(id))
            .and_then(|entry| entry.event.as_ref())
    }

    pub fn status(&self, id: EventId) -> Option<EntryStatus> {
        self.entries.get(&self.resolve(id)).map(|entry| entry.status)
    }

    /// Map a temporary id to its server id once known.
    pub fn resolve(&self, id: EventId) -> EventId {
        self.temp_ids.get(&id).copied().unwrap_or(id)
    }

    /// Show an optimistic create under its temporary id.
    pub fn begin_local_create(&mut self, event: Event) {
        self.entries.insert(
            event.id,
            Entry {
                event: Some(event),
                status: EntryStatus::LocalOnly,
            },
        );
    }

    /// The server accepted a create: swap the temporary entry for the real one
    /// and wait for the echo. If the echo already arrived the entry stays
    /// confirmed.
    pub fn complete_create(&mut self, temp_id: EventId, event: Event) {
        self.entries.remove(&temp_id);
        self.temp_ids.insert(temp_id, event.id);
        self.expect_created(event);
    }

    /// Show an event this client just created on the server (for example a
    /// joined copy) and wait for its echo.
    pub fn expect_created(&mut self, event: Event) {
        match self.entries.get_mut(&event.id) {
            Some(entry) => entry.event = Some(event),
            None => {
                self.entries.insert(
                    event.id,
                    Entry {
                        event: Some(event),
                        status: EntryStatus::PendingConfirmation(PendingKind::Create),
                    },
                );
            }
        }
    }

    /// Show an optimistic edit. Returns the previous state for [`Self::revert`].
    pub fn begin_local_update(&mut self, event: Event) -> Option<Event> {
        let status = if event.id.is_temporary() {
            EntryStatus::LocalOnly
        } else {
            EntryStatus::PendingConfirmation(PendingKind::Update)
        };
        self.entries
            .insert(
                event.id,
                Entry {
                    event: Some(event),
                    status,
                },
            )
            .and_then(|entry| entry.event)
    }

    /// A REST update response arrived. The echo is still expected.
    pub fn confirm_update(&mut self, event: Event) {
        let status = match self.entries.get(&event.id).map(|entry| entry.status) {
            Some(EntryStatus::Confirmed) => EntryStatus::Confirmed,
            _ => EntryStatus::PendingConfirmation(PendingKind::Update),
        };
        self.entries.insert(
            event.id,
            Entry {
                event: Some(event),
                status,
            },
        );
    }

    /// Hide an event being deleted. Local-only events disappear outright.
    /// Returns the previous state for [`Self::revert`].
    pub fn begin_local_delete(&mut self, id: EventId) -> Option<Event> {
        if id.is_temporary() {
            return self.entries.remove(&id).and_then(|entry| entry.event);
        }
        let previous = self.entries.get(&id).and_then(|entry| entry.event.clone());
        self.entries.insert(
            id,
            Entry {
                event: None,
                status: EntryStatus::PendingConfirmation(PendingKind::Delete),
            },
        );
        previous
    }

    /// Mark a write about to be replayed so its echo is recognised.
    pub fn expect_echo(&mut self, id: EventId, kind: PendingKind) {
        let entry = self.entries.entry(id).or_insert(Entry {
            event: None,
            status: EntryStatus::Confirmed,
        });
        entry.status = EntryStatus::PendingConfirmation(kind);
        if kind == PendingKind::Delete {
            entry.event = None;
        }
    }

    /// No echo will come for this id (the write failed or was a no-op).
    pub fn clear_pending(&mut self, id: EventId) {
        let remove = match self.entries.get_mut(&id) {
            Some(entry) if entry.event.is_none() => true,
            Some(entry) => {
                if matches!(entry.status, EntryStatus::PendingConfirmation(_)) {
                    entry.status = EntryStatus::Confirmed;
                }
                false
            }
            None => false,
        };
        if remove {
            self.entries.remove(&id);
        }
    }

    /// The event no longer exists anywhere.
    pub fn forget(&mut self, id: EventId) {
        self.entries.remove(&id);
    }

    /// Undo an optimistic change that could not be applied or queued.
    pub fn revert(&mut self, id: EventId, previous: Option<Event>) {
        match previous {
            Some(event) => {
                let status = if event.id.is_temporary() {
                    EntryStatus::LocalOnly
                } else {
                    EntryStatus::Confirmed
                };
                self.entries.insert(
                    id,
                    Entry {
                        event: Some(event),
                        status,
                    },
                );
            }
            None => {
                self.entries.remove(&id);
            }
        }
    }

    /// Replace the view with an authoritative snapshot. Local-only creates
    /// survive; everything else becomes confirmed.
    pub fn replace_view(&mut self, events: Vec<Event>) {
        let mut entries: BTreeMap<EventId, Entry> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.status == EntryStatus::LocalOnly)
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        for event in events {
            entries.insert(
                event.id,
                Entry {
                    event: Some(event),
                    status: EntryStatus::Confirmed,
                },
            );
        }
        self.entries = entries;
    }

    /// Merge one real-time push into the view.
    pub fn apply_push(&mut self, message: &PushMessage) -> PushOutcome {
        match message {
            PushMessage::Created(event) => self.apply_created(event),
            PushMessage::Updated(event) => self.apply_updated(event),
            PushMessage::Deleted(deleted) => self.apply_deleted(deleted),
        }
    }

    fn apply_created(&mut self, event: &Event) -> PushOutcome {
        let current = self.entries.get(&event.id).map(|entry| entry.status);

        if current == Some(EntryStatus::PendingConfirmation(PendingKind::Create)) {
            self.temp_ids.retain(|_, real| *real != event.id);
            self.set_confirmed(event.clone());
            return PushOutcome::Confirmed;
        }

        if let Some(temp_id) = self.take_mapping_to(event.id) {
            self.entries.remove(&temp_id);
            if current.is_some() {
                return PushOutcome::Ignored;
            }
            self.set_confirmed(event.clone());
            return PushOutcome::Replaced {
                temp_id,
                event: event.clone(),
            };
        }

        if current.is_none() {
            self.set_confirmed(event.clone());
            return PushOutcome::Inserted(event.clone());
        }

        PushOutcome::Ignored
    }

    fn apply_updated(&mut self, event: &Event) -> PushOutcome {
        if let Some(temp_id) = self.take_mapping_to(event.id) {
            self.entries.remove(&temp_id);
        }

        match self.entries.get(&event.id).map(|entry| entry.status) {
            Some(EntryStatus::PendingConfirmation(PendingKind::Update)) => {
                self.set_confirmed(event.clone());
                PushOutcome::Confirmed
            }
            Some(EntryStatus::PendingConfirmation(PendingKind::Delete)) => PushOutcome::Ignored,
            Some(EntryStatus::PendingConfirmation(PendingKind::Create)) => {
                if let Some(entry) = self.entries.get_mut(&event.id) {
                    entry.event = Some(event.clone());
                }
                PushOutcome::Applied(event.clone())
            }
            Some(EntryStatus::LocalOnly | EntryStatus::Confirmed) | None => {
                self.set_confirmed(event.clone());
                PushOutcome::Applied(event.clone())
            }
        }
    }

    fn apply_deleted(&mut self, deleted: &DeletedEvent) -> PushOutcome {
        if let Some(temp_id) = self.take_mapping_to(deleted.id) {
            self.entries.remove(&temp_id);
        }

        match self.entries.get(&deleted.id).map(|entry| entry.status) {
            Some(EntryStatus::PendingConfirmation(PendingKind::Delete)) => {
                self.entries.remove(&deleted.id);
                PushOutcome::Confirmed
            }
            Some(_) => {
                let removed = self.entries.remove(&deleted.id);
                if removed.and_then(|entry| entry.event).is_some() {
                    PushOutcome::Removed(deleted.clone())
                } else {
                    PushOutcome::Ignored
                }
            }
            None => PushOutcome::Ignored,
        }
    }

    fn set_confirmed(&mut self, event: Event) {
        self.entries.insert(
            event.id,
            Entry {
                event: Some(event),
                status: EntryStatus::Confirmed,
            },
        );
    }

    fn take_mapping_to(&mut self, real_id: EventId) -> Option<EventId> {
        let temp_id = self
            .temp_ids
            .iter()
            .find_map(|(temp, real)| (*real == real_id).then_some(*temp))?;
        self.temp_ids.remove(&temp_id);
        Some(temp_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::EventDraft;

    fn event(id: i64, title: &str) -> Event {
        Event::from_draft(
            EventId::new(id),
            1,
            EventDraft::new(
                title,
                Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap(),
            ),
            1_000,
        )
    }

    fn ids(reconciler: &ClientReconciler) -> Vec<i64> {
        reconciler.events().iter().map(|event| event.id.get()).collect()
    }

    #[test]
    fn own_create_echo_after_response_is_deduplicated() {
        let mut view = ClientReconciler::new();
        view.begin_local_create(event(-123, "Standup"));
        view.complete_create(EventId::new(-123), event(57, "Standup"));
        assert_eq!(ids(&view), vec![57]);

        let outcome = view.apply_push(&PushMessage::Created(event(57, "Standup")));
        assert_eq!(outcome, PushOutcome::Confirmed);
        assert_eq!(ids(&view), vec![57]);

        // Re-delivered push is a duplicate.
        let outcome = view.apply_push(&PushMessage::Created(event(57, "Standup")));
        assert_eq!(outcome, PushOutcome::Ignored);
        assert_eq!(ids(&view), vec![57]);
    }

    #[test]
    fn own_create_echo_before_response_is_deduplicated() {
        let mut view = ClientReconciler::new();
        view.begin_local_create(event(-1, "Standup"));

        let outcome = view.apply_push(&PushMessage::Created(event(57, "Standup")));
        assert!(matches!(outcome, PushOutcome::Inserted(_)));

        view.complete_create(EventId::new(-1), event(57, "Standup"));
        assert_eq!(ids(&view), vec![57]);
        assert_eq!(view.status(EventId::new(57)), Some(EntryStatus::Confirmed));
        assert_eq!(view.resolve(EventId::new(-1)), EventId::new(57));
    }

    #[test]
    fn mapping_replaces_temporary_entry_on_push() {
        let mut view = ClientReconciler::seed(vec![event(-5, "Offline"), event(3, "Existing")]);
        view.temp_ids.insert(EventId::new(-5), EventId::new(60));

        let outcome = view.apply_push(&PushMessage::Created(event(60, "Offline")));
        assert_eq!(
            outcome,
            PushOutcome::Replaced {
                temp_id: EventId::new(-5),
                event: event(60, "Offline"),
            }
        );
        assert_eq!(ids(&view), vec![3, 60]);
        assert!(!view.temp_ids.contains_key(&EventId::new(-5)));
    }

    #[test]
    fn foreign_create_is_inserted_once() {
        let mut view = ClientReconciler::new();
        assert!(matches!(
            view.apply_push(&PushMessage::Created(event(8, "Theirs"))),
            PushOutcome::Inserted(_)
        ));
        assert_eq!(
            view.apply_push(&PushMessage::Created(event(8, "Theirs"))),
            PushOutcome::Ignored
        );
        assert_eq!(ids(&view), vec![8]);
    }

    #[test]
    fn own_update_echo_is_silent() {
        let mut view = ClientReconciler::seed(vec![event(4, "Draft")]);
        view.begin_local_update(event(4, "Final"));

        let outcome = view.apply_push(&PushMessage::Updated(event(4, "Final")));
        assert_eq!(outcome, PushOutcome::Confirmed);

        let outcome = view.apply_push(&PushMessage::Updated(event(4, "Changed elsewhere")));
        assert_eq!(outcome, PushOutcome::Applied(event(4, "Changed elsewhere")));
        assert_eq!(view.get(EventId::new(4)).unwrap().title, "Changed elsewhere");
    }

    #[test]
    fn delete_echo_is_silent_and_foreign_delete_is_reported() {
        let mut view = ClientReconciler::seed(vec![event(4, "Mine"), event(5, "Other")]);
        view.begin_local_delete(EventId::new(4));
        assert_eq!(ids(&view), vec![5]);

        // Updates racing a pending delete do not resurrect it.
        assert_eq!(
            view.apply_push(&PushMessage::Updated(event(4, "Mine"))),
            PushOutcome::Ignored
        );

        let own = DeletedEvent {
            id: EventId::new(4),
            title: "Mine".to_string(),
        };
        assert_eq!(view.apply_push(&PushMessage::Deleted(own.clone())), PushOutcome::Confirmed);
        assert_eq!(view.apply_push(&PushMessage::Deleted(own)), PushOutcome::Ignored);

        let foreign = DeletedEvent {
            id: EventId::new(5),
            title: "Other".to_string(),
        };
        assert_eq!(
            view.apply_push(&PushMessage::Deleted(foreign.clone())),
            PushOutcome::Removed(foreign)
        );
        assert!(view.events().is_empty());
    }

    #[test]
    fn revert_restores_previous_state() {
        let mut view = ClientReconciler::seed(vec![event(4, "Before")]);
        let previous = view.begin_local_update(event(4, "After"));
        view.revert(EventId::new(4), previous);
        assert_eq!(view.get(EventId::new(4)).unwrap().title, "Before");
        assert_eq!(view.status(EventId::new(4)), Some(EntryStatus::Confirmed));

        view.begin_local_create(event(-2, "Doomed"));
        view.revert(EventId::new(-2), None);
        assert_eq!(ids(&view), vec![4]);
    }

    #[test]
    fn replace_view_keeps_local_only_entries() {
        let mut view = ClientReconciler::seed(vec![event(4, "Old")]);
        view.begin_local_create(event(-9, "Unsynced"));
        view.begin_local_update(event(4, "Edited"));

        view.replace_view(vec![event(4, "Server"), event(7, "New")]);
        assert_eq!(ids(&view), vec![-9, 4, 7]);
        assert_eq!(view.status(EventId::new(4)), Some(EntryStatus::Confirmed));
        assert_eq!(view.status(EventId::new(-9)), Some(EntryStatus::LocalOnly));
    }

    #[test]
    fn view_converges_to_one_entry_per_id() {
        let mut view = ClientReconciler::new();
        view.begin_local_create(event(-1, "A"));
        view.apply_push(&PushMessage::Created(event(10, "A")));
        view.complete_create(EventId::new(-1), event(10, "A"));
        view.apply_push(&PushMessage::Updated(event(10, "A2")));
        view.apply_push(&PushMessage::Created(event(10, "A")));
        view.apply_push(&PushMessage::Created(event(11, "B")));
        view.begin_local_update(event(11, "B2"));
        view.apply_push(&PushMessage::Updated(event(11, "B2")));

        assert_eq!(ids(&view), vec![10, 11]);
        assert_eq!(view.get(EventId::new(10)).unwrap().title, "A2");
        assert_eq!(view.get(EventId::new(11)).unwrap().title, "B2");
    }
}
