use crate::commands::common::{
    event_to_list_item, format_event_lines, open_connected_session, parse_event_id, print_lines,
    Context, EventListItem,
};
use crate::error::CliError;

pub async fn run_public(as_json: bool, context: &Context) -> Result<(), CliError> {
    let session = open_connected_session(context).await?;
    if !session.monitor().is_online() {
        return Err(CliError::Offline("public"));
    }
    let events = session.public_events().await?;

    if as_json {
        let json_items = events
            .iter()
            .map(event_to_list_item)
            .collect::<Vec<EventListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        print_lines(&format_event_lines(&events), "No public events.");
    }
    Ok(())
}

pub async fn run_join(id: &str, context: &Context) -> Result<(), CliError> {
    let id = parse_event_id(id)?;
    if id.is_temporary() {
        return Err(CliError::InvalidArgument(
            "only synced public events can be joined".to_string(),
        ));
    }
    let session = open_connected_session(context).await?;
    if !session.monitor().is_online() {
        return Err(CliError::Offline("join"));
    }
    let copy = session.join(id).await?;
    println!("{}", copy.id);
    Ok(())
}
