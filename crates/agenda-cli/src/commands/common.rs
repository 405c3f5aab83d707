use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use agenda_core::client::Session;
use agenda_core::config::ClientConfig;
use agenda_core::models::{
    ConflictRecord, DeadLetter, Event, EventDraft, QueuedOperation, Visibility,
};
use agenda_core::sync::{ClientNotice, ConnectivityState};
use agenda_core::EventId;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use crate::cli::{EventDetails, VisibilityArg};
use crate::error::CliError;

/// Global flags every command needs to reach the local store and the API.
#[derive(Debug, Clone)]
pub struct Context {
    pub db_path: PathBuf,
    pub api_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventListItem {
    pub id: i64,
    pub title: String,
    pub start_at: String,
    pub end_at: String,
    pub all_day: bool,
    pub location: Option<String>,
    pub visibility: &'static str,
    /// Not yet confirmed by the server
    pub pending: bool,
    pub original_event_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PendingItem {
    pub operation_id: String,
    pub kind: &'static str,
    pub target_id: i64,
    pub enqueued_at: String,
    pub attempts: u32,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: i64,
    pub event_id: i64,
    pub local_timestamp: i64,
    pub server_timestamp: i64,
    pub recorded_at: i64,
    pub recorded_at_iso: String,
    pub strategy: String,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterItem {
    pub operation_id: String,
    pub kind: &'static str,
    pub target_id: i64,
    pub attempts: u32,
    pub reason: String,
    pub failed_at_iso: String,
}

pub async fn open_session(context: &Context) -> Result<Session, CliError> {
    let config = load_client_config(context)?;
    tracing::debug!(?config, db_path = %context.db_path.display(), "Opening session");
    Ok(Session::open(&config, &context.db_path).await?)
}

/// Open the session and probe the server once.
pub async fn open_connected_session(context: &Context) -> Result<Session, CliError> {
    let session = open_session(context).await?;
    if session.check_connectivity().await == ConnectivityState::Offline {
        tracing::info!("Server unreachable; working offline");
    }
    Ok(session)
}

pub fn load_client_config(context: &Context) -> Result<ClientConfig, CliError> {
    let mut values: HashMap<String, String> = env::vars().collect();
    apply_overrides(&mut values, context.api_url.as_deref(), context.token.as_deref());
    Ok(ClientConfig::from_lookup(|name| values.get(name).cloned())?)
}

/// Command-line flags win over environment values.
pub fn apply_overrides(
    values: &mut HashMap<String, String>,
    api_url: Option<&str>,
    token: Option<&str>,
) {
    if let Some(api_url) = api_url {
        values.insert("AGENDA_API_URL".to_string(), api_url.to_string());
    }
    if let Some(token) = token {
        values.insert("AGENDA_ACCESS_TOKEN".to_string(), token.to_string());
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("AGENDA_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path().ok_or(CliError::NoDataDir)
}

pub fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("agenda").join("agenda.db"))
}

pub fn parse_event_id(raw: &str) -> Result<EventId, CliError> {
    let id = raw
        .trim()
        .parse::<EventId>()
        .map_err(|_| CliError::InvalidArgument(format!("`{raw}` is not an event id")))?;
    if id.is_unset() {
        return Err(CliError::InvalidArgument("event id cannot be 0".to_string()));
    }
    Ok(id)
}

/// Parse a user-supplied time: RFC 3339, or a local `YYYY-MM-DD HH:MM`
/// (a `T` separator also works), or a bare local date meaning midnight.
pub fn parse_when(raw: &str) -> Result<DateTime<Utc>, CliError> {
    let value = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| CliError::InvalidArgument(format!("cannot parse time `{raw}`")))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| CliError::InvalidArgument(format!("`{raw}` does not exist locally")))
}

pub fn apply_details(draft: &mut EventDraft, details: &EventDetails) {
    if let Some(description) = &details.description {
        draft.description = Some(description.clone());
    }
    if let Some(location) = &details.location {
        draft.location = Some(location.clone());
    }
    if let Some(color) = &details.color {
        draft.color.clone_from(color);
    }
    if let Some(visibility) = details.visibility {
        draft.visibility = match visibility {
            VisibilityArg::Public => Visibility::Public,
            VisibilityArg::Private => Visibility::Private,
        };
    }
    if details.all_day {
        draft.all_day = true;
    }
}

pub fn event_to_list_item(event: &Event) -> EventListItem {
    EventListItem {
        id: event.id.get(),
        title: event.title.clone(),
        start_at: event.start_at.to_rfc3339(),
        end_at: event.end_at.to_rfc3339(),
        all_day: event.all_day,
        location: event.location.clone(),
        visibility: event.visibility.as_str(),
        pending: event.id.is_temporary(),
        original_event_id: event.original_event_id.map(EventId::get),
    }
}

pub fn format_event_lines(events: &[Event]) -> Vec<String> {
    events.iter().map(format_event_line).collect()
}

pub fn format_event_line(event: &Event) -> String {
    let when = format_event_window(event);
    let title = truncate(&event.title, 40);
    let mut flags = Vec::new();
    if event.id.is_temporary() {
        flags.push("unsynced");
    }
    if event.visibility.is_public() {
        flags.push("public");
    }
    if event.original_event_id.is_some() {
        flags.push("joined");
    }

    if flags.is_empty() {
        format!("{:>6}  {when:<27}  {title}", event.id)
    } else {
        format!(
            "{:>6}  {when:<27}  {title:<40}  [{}]",
            event.id,
            flags.join(", ")
        )
    }
}

pub fn format_event_window(event: &Event) -> String {
    let start = event.start_at.with_timezone(&Local);
    let end = event.end_at.with_timezone(&Local);
    if event.all_day {
        return format!("{} (all day)", start.format("%Y-%m-%d"));
    }
    if start.date_naive() == end.date_naive() {
        format!("{} - {}", start.format("%Y-%m-%d %H:%M"), end.format("%H:%M"))
    } else {
        format!(
            "{} - {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%m-%d %H:%M")
        )
    }
}

pub fn format_event_details(event: &Event) -> Vec<String> {
    let mut lines = vec![
        format!("{}  {}", event.id, event.title),
        format!("when:       {}", format_event_window(event)),
        format!("visibility: {}", event.visibility.as_str()),
        format!("status:     {}", event.status.as_str()),
        format!("type:       {}", event.event_type.as_str()),
        format!("color:      {}", event.color),
    ];
    if let Some(location) = &event.location {
        lines.push(format!("location:   {location}"));
    }
    if let Some(original) = event.original_event_id {
        lines.push(format!("joined from {original}"));
    }
    for invitation in &event.invitations {
        lines.push(format!("invited:    {} <{}>", invitation.name, invitation.email));
    }
    if let Some(description) = &event.description {
        lines.push(String::new());
        lines.push(description.clone());
    }
    if event.id.is_temporary() {
        lines.push("(not yet synced)".to_string());
    }
    lines
}

pub fn pending_to_item(queued: &QueuedOperation) -> PendingItem {
    PendingItem {
        operation_id: queued.operation.id.clone(),
        kind: queued.operation.kind.as_str(),
        target_id: queued.operation.target_id.get(),
        enqueued_at: format_timestamp(queued.operation.timestamp),
        attempts: queued.attempts,
    }
}

pub fn format_pending_lines(pending: &[QueuedOperation]) -> Vec<String> {
    pending
        .iter()
        .map(|queued| {
            format!(
                "{}  {:<6}  event={}  attempts={}",
                format_timestamp(queued.operation.timestamp),
                queued.operation.kind.as_str(),
                queued.operation.target_id,
                queued.attempts
            )
        })
        .collect()
}

pub fn conflict_to_item(conflict: &ConflictRecord) -> ConflictItem {
    ConflictItem {
        id: conflict.id,
        event_id: conflict.event_id.get(),
        local_timestamp: conflict.local_timestamp,
        server_timestamp: conflict.server_timestamp,
        recorded_at: conflict.recorded_at,
        recorded_at_iso: format_timestamp(conflict.recorded_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_conflict_lines(conflicts: &[ConflictRecord]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}  event={}  local={} server={}",
                format_timestamp(conflict.recorded_at),
                conflict.strategy,
                conflict.event_id,
                conflict.local_timestamp,
                conflict.server_timestamp
            )
        })
        .collect()
}

pub fn dead_letter_to_item(letter: &DeadLetter) -> DeadLetterItem {
    DeadLetterItem {
        operation_id: letter.operation.id.clone(),
        kind: letter.operation.kind.as_str(),
        target_id: letter.operation.target_id.get(),
        attempts: letter.attempts,
        reason: letter.reason.clone(),
        failed_at_iso: format_timestamp(letter.failed_at),
    }
}

pub fn format_dead_letter_lines(letters: &[DeadLetter]) -> Vec<String> {
    letters
        .iter()
        .map(|letter| {
            format!(
                "{}  {:<6}  event={}  attempts={}  {}",
                format_timestamp(letter.failed_at),
                letter.operation.kind.as_str(),
                letter.operation.target_id,
                letter.attempts,
                letter.reason
            )
        })
        .collect()
}

/// One line per notice, or `None` for notices not worth printing.
pub fn format_notice(notice: &ClientNotice) -> Option<String> {
    match notice {
        ClientNotice::Connectivity(ConnectivityState::Online) => Some("Connected".to_string()),
        ClientNotice::Connectivity(ConnectivityState::Offline) => {
            Some("Offline; changes will be queued".to_string())
        }
        ClientNotice::Status(status) => Some(status.clone()),
        ClientNotice::PendingCount(0) => None,
        ClientNotice::PendingCount(count) => Some(format!("{count} change(s) pending")),
        ClientNotice::EventAdded(event) => Some(format!("+ {}", format_event_line(event))),
        ClientNotice::EventChanged(event) => Some(format!("~ {}", format_event_line(event))),
        ClientNotice::EventRemoved(deleted) => {
            Some(format!("- {:>6}  {}", deleted.id, deleted.title))
        }
        ClientNotice::Conflicts(conflicts) => Some(format!(
            "{} conflicting edit(s) overwritten (last write wins)",
            conflicts.len()
        )),
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let mut truncated = collapsed
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn print_lines(lines: &[String], empty_message: &str) {
    if lines.is_empty() {
        println!("{empty_message}");
    }
    for line in lines {
        println!("{line}");
    }
}
