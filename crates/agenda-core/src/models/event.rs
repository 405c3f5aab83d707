//! Event model

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default color assigned to events created without one.
pub const DEFAULT_EVENT_COLOR: &str = "#3b82f6";

/// Maximum accepted title length in characters.
pub const MAX_TITLE_LEN: usize = 200;

static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("Invalid regex"));

/// Identifier of a user account.
pub type UserId = i64;

/// Identifier of an event.
///
/// Positive ids are assigned by the server. Negative ids are temporary
/// placeholders generated by a client for creations not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this id is a client-generated placeholder.
    #[must_use]
    pub const fn is_temporary(self) -> bool {
        self.0 < 0
    }

    /// Zero is never assigned and marks a missing target.
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Lifecycle status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Late,
}

impl EventStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Late => "late",
        }
    }
}

impl FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "in_progress" | "inprogress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "late" => Ok(Self::Late),
            other => Err(Error::InvalidInput(format!("unknown event status `{other}`"))),
        }
    }
}

/// Kind of event. Unknown values fall back to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Meeting,
    Appointment,
    Task,
    Reminder,
    Birthday,
    Holiday,
    #[default]
    #[serde(other)]
    Other,
}

impl EventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Meeting => "meeting",
            Self::Appointment => "appointment",
            Self::Task => "task",
            Self::Reminder => "reminder",
            Self::Birthday => "birthday",
            Self::Holiday => "holiday",
            Self::Other => "other",
        }
    }

    /// Lenient parse used for stored and user-supplied values.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "meeting" => Self::Meeting,
            "appointment" => Self::Appointment,
            "task" => Self::Task,
            "reminder" => Self::Reminder,
            "birthday" => Self::Birthday,
            "holiday" => Self::Holiday,
            _ => Self::Other,
        }
    }
}

/// Who may see an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl Visibility {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub const fn is_public(self) -> bool {
        matches!(self, Self::Public)
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(Error::InvalidInput(format!("unknown visibility `{other}`"))),
        }
    }
}

/// An invitee attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// The mutable fields of an event.
///
/// Used as the request body for creates and updates, and as the payload of
/// queued offline operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub invitations: Vec<Invitation>,
}

fn default_color() -> String {
    DEFAULT_EVENT_COLOR.to_string()
}

impl EventDraft {
    /// Minimal draft with defaults for every optional field.
    #[must_use]
    pub fn new(title: impl Into<String>, start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: None,
            start_at,
            end_at,
            location: None,
            all_day: false,
            color: default_color(),
            status: EventStatus::default(),
            event_type: EventType::default(),
            visibility: Visibility::default(),
            category_id: None,
            invitations: Vec::new(),
        }
    }

    /// Business-rule validation shared by the API and the offline client.
    pub fn validate(&self) -> Result<()> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("title must not be empty".into()));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(Error::InvalidInput(format!(
                "title must be at most {MAX_TITLE_LEN} characters"
            )));
        }
        if self.end_at < self.start_at {
            return Err(Error::InvalidInput("end must not be before start".into()));
        }
        if !HEX_COLOR.is_match(&self.color) {
            return Err(Error::InvalidInput(format!(
                "color `{}` must be a #RRGGBB hex value",
                self.color
            )));
        }
        for invitation in &self.invitations {
            if invitation.name.trim().is_empty() {
                return Err(Error::InvalidInput("invitee name must not be empty".into()));
            }
            if !invitation.email.contains('@') {
                return Err(Error::InvalidInput(format!(
                    "invitee email `{}` is not valid",
                    invitation.email
                )));
            }
        }
        Ok(())
    }
}

/// A calendar entry owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub owner_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub location: Option<String>,
    pub all_day: bool,
    pub color: String,
    pub status: EventStatus,
    pub event_type: EventType,
    pub visibility: Visibility,
    pub category_id: Option<i64>,
    /// Source event when this record is a joined copy
    pub original_event_id: Option<EventId>,
    pub invitations: Vec<Invitation>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last modification timestamp (Unix ms), absent until first update
    pub last_modified_at: Option<i64>,
}

impl Event {
    /// Build an event from a draft.
    #[must_use]
    pub fn from_draft(id: EventId, owner_id: UserId, draft: EventDraft, created_at: i64) -> Self {
        Self {
            id,
            owner_id,
            title: draft.title.trim().to_string(),
            description: draft.description,
            start_at: draft.start_at,
            end_at: draft.end_at,
            location: draft.location,
            all_day: draft.all_day,
            color: draft.color,
            status: draft.status,
            event_type: draft.event_type,
            visibility: draft.visibility,
            category_id: draft.category_id,
            original_event_id: None,
            invitations: draft.invitations,
            created_at,
            last_modified_at: None,
        }
    }

    /// Overwrite the mutable fields with the draft's values.
    pub fn apply_draft(&mut self, draft: EventDraft) {
        self.title = draft.title.trim().to_string();
        self.description = draft.description;
        self.start_at = draft.start_at;
        self.end_at = draft.end_at;
        self.location = draft.location;
        self.all_day = draft.all_day;
        self.color = draft.color;
        self.status = draft.status;
        self.event_type = draft.event_type;
        self.visibility = draft.visibility;
        self.category_id = draft.category_id;
        self.invitations = draft.invitations;
    }

    /// The mutable fields of this event as a draft.
    #[must_use]
    pub fn to_draft(&self) -> EventDraft {
        EventDraft {
            title: self.title.clone(),
            description: self.description.clone(),
            start_at: self.start_at,
            end_at: self.end_at,
            location: self.location.clone(),
            all_day: self.all_day,
            color: self.color.clone(),
            status: self.status,
            event_type: self.event_type,
            visibility: self.visibility,
            category_id: self.category_id,
            invitations: self.invitations.clone(),
        }
    }

    /// Timestamp used by the conflict policy: last modification, else creation.
    #[must_use]
    pub fn last_modified(&self) -> i64 {
        self.last_modified_at.unwrap_or(self.created_at)
    }

    /// Whether the event's time span overlaps `[start, end]`.
    #[must_use]
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_at <= end && self.end_at >= start
    }
}
