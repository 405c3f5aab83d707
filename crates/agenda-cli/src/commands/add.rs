use agenda_core::models::EventDraft;
use chrono::Duration;

use crate::cli::EventDetails;
use crate::commands::common::{
    apply_details, event_to_list_item, open_connected_session, parse_when, Context,
};
use crate::error::CliError;

pub struct AddArgs<'a> {
    pub title: &'a [String],
    pub start: &'a str,
    pub end: Option<&'a str>,
    pub duration_minutes: i64,
    pub details: &'a EventDetails,
    pub json: bool,
}

pub fn build_draft(args: &AddArgs<'_>) -> Result<EventDraft, CliError> {
    let title = args.title.join(" ");
    let start = parse_when(args.start)?;
    let end = match args.end {
        Some(end) => parse_when(end)?,
        None => {
            if args.duration_minutes < 0 {
                return Err(CliError::InvalidArgument(
                    "duration cannot be negative".to_string(),
                ));
            }
            start + Duration::minutes(args.duration_minutes)
        }
    };

    let mut draft = EventDraft::new(title.trim(), start, end);
    apply_details(&mut draft, args.details);
    Ok(draft)
}

pub async fn run_add(args: AddArgs<'_>, context: &Context) -> Result<(), CliError> {
    let draft = build_draft(&args)?;
    let session = open_connected_session(context).await?;
    let event = session.create(draft).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&event_to_list_item(&event))?);
    } else if event.id.is_temporary() {
        println!("{} (queued until the server is reachable)", event.id);
    } else {
        println!("{}", event.id);
    }
    Ok(())
}
