use agenda_core::sync::SyncOutcome;

use crate::commands::common::{
    conflict_to_item, dead_letter_to_item, format_conflict_lines, format_dead_letter_lines,
    format_pending_lines, open_connected_session, open_session, pending_to_item, print_lines,
    ConflictItem, Context, DeadLetterItem, PendingItem,
};
use crate::error::CliError;

pub async fn run_sync(context: &Context) -> Result<(), CliError> {
    let session = open_connected_session(context).await?;
    let report = session.synchronize().await;

    match &report.outcome {
        SyncOutcome::SkippedOffline => return Err(CliError::Offline("sync")),
        SyncOutcome::Completed | SyncOutcome::SkippedInFlight | SyncOutcome::Failed(_) => {}
    }
    println!("{}", report.summary());
    for (temp_id, server_id) in &report.mappings {
        println!("{temp_id} -> {server_id}");
    }
    if report.dead_lettered > 0 {
        println!(
            "{} change(s) could not be applied; see `agenda dead-letters`",
            report.dead_lettered
        );
    }
    Ok(())
}

pub async fn run_pending(as_json: bool, context: &Context) -> Result<(), CliError> {
    let session = open_session(context).await?;
    let pending = session.pending().await?;

    if as_json {
        let json_items = pending.iter().map(pending_to_item).collect::<Vec<PendingItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        print_lines(&format_pending_lines(&pending), "Nothing pending.");
    }
    Ok(())
}

pub async fn run_conflicts(limit: usize, as_json: bool, context: &Context) -> Result<(), CliError> {
    let session = open_session(context).await?;
    let conflicts = session.conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        print_lines(&format_conflict_lines(&conflicts), "No sync conflicts recorded.");
    }
    Ok(())
}

pub async fn run_dead_letters(as_json: bool, context: &Context) -> Result<(), CliError> {
    let session = open_session(context).await?;
    let letters = session.dead_letters().await?;

    if as_json {
        let json_items = letters
            .iter()
            .map(dead_letter_to_item)
            .collect::<Vec<DeadLetterItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        print_lines(&format_dead_letter_lines(&letters), "No dead letters.");
    }
    Ok(())
}
