use crate::commands::common::{open_connected_session, parse_event_id, Context};
use crate::error::CliError;

pub async fn run_delete(id: &str, context: &Context) -> Result<(), CliError> {
    let id = parse_event_id(id)?;
    let session = open_connected_session(context).await?;
    session.delete(id).await?;
    println!("{id}");
    Ok(())
}
