use agenda_core::models::{Event, EventDraft};

use crate::cli::EventDetails;
use crate::commands::common::{
    apply_details, open_connected_session, parse_event_id, parse_when, Context,
};
use crate::error::CliError;

pub struct UpdateArgs<'a> {
    pub id: &'a str,
    pub title: Option<&'a str>,
    pub start: Option<&'a str>,
    pub end: Option<&'a str>,
    pub details: &'a EventDetails,
}

/// The event's current fields with the given changes applied. A new start
/// without a new end keeps the event's duration.
pub fn merge_changes(current: &Event, args: &UpdateArgs<'_>) -> Result<EventDraft, CliError> {
    let mut draft = current.to_draft();
    if let Some(title) = args.title {
        draft.title = title.trim().to_string();
    }
    if let Some(start) = args.start {
        let start = parse_when(start)?;
        let duration = draft.end_at - draft.start_at;
        draft.start_at = start;
        draft.end_at = start + duration;
    }
    if let Some(end) = args.end {
        draft.end_at = parse_when(end)?;
    }
    apply_details(&mut draft, args.details);
    Ok(draft)
}

pub async fn run_update(args: UpdateArgs<'_>, context: &Context) -> Result<(), CliError> {
    let id = parse_event_id(args.id)?;
    let session = open_connected_session(context).await?;
    let current = session
        .event(id)
        .await
        .ok_or_else(|| CliError::EventNotFound(id.to_string()))?;

    let draft = merge_changes(&current, &args)?;
    if draft == current.to_draft() {
        println!("{}", current.id);
        return Ok(());
    }

    let updated = session.update(current.id, draft).await?;
    println!("{}", updated.id);
    Ok(())
}
