use crate::commands::common::{
    event_to_list_item, format_event_details, format_event_lines, open_connected_session,
    open_session, parse_event_id, parse_when, print_lines, Context, EventListItem,
};
use crate::error::CliError;

pub async fn run_list(
    from: Option<&str>,
    to: Option<&str>,
    as_json: bool,
    context: &Context,
) -> Result<(), CliError> {
    let window = match (from, to) {
        (Some(from), Some(to)) => Some((parse_when(from)?, parse_when(to)?)),
        _ => None,
    };

    let session = open_connected_session(context).await?;
    if session.monitor().is_online() {
        let report = session.synchronize().await;
        tracing::debug!(summary = %report.summary(), "Synced before listing");
    }

    let events = match window {
        Some((start, end)) => session.events_between(start, end).await?,
        None => session.events().await,
    };

    if as_json {
        let json_items = events
            .iter()
            .map(event_to_list_item)
            .collect::<Vec<EventListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        print_lines(&format_event_lines(&events), "No events.");
    }
    Ok(())
}

pub async fn run_show(id: &str, as_json: bool, context: &Context) -> Result<(), CliError> {
    let id = parse_event_id(id)?;
    let session = open_session(context).await?;
    let event = session
        .event(id)
        .await
        .ok_or_else(|| CliError::EventNotFound(id.to_string()))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&event)?);
    } else {
        for line in format_event_details(&event) {
            println!("{line}");
        }
    }
    Ok(())
}
