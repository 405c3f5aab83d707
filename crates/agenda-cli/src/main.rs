//! Agenda CLI - offline-first calendar from the terminal
//!
//! Changes are applied locally first and replayed to the server when it
//! is reachable.

mod cli;
mod commands;
mod error;
mod realtime;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::add::{run_add, AddArgs};
use crate::commands::common::{resolve_db_path, Context};
use crate::commands::completions::run_completions;
use crate::commands::delete::run_delete;
use crate::commands::list::{run_list, run_show};
use crate::commands::public::{run_join, run_public};
use crate::commands::sync::{run_conflicts, run_dead_letters, run_pending, run_sync};
use crate::commands::update::{run_update, UpdateArgs};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agenda=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let context = Context {
        db_path: resolve_db_path(cli.db_path)?,
        api_url: cli.api_url,
        token: cli.token,
    };

    match cli.command {
        Commands::Add {
            title,
            start,
            end,
            duration,
            details,
            json,
        } => {
            let args = AddArgs {
                title: &title,
                start: &start,
                end: end.as_deref(),
                duration_minutes: duration,
                details: &details,
                json,
            };
            run_add(args, &context).await?;
        }
        Commands::List { from, to, json } => {
            run_list(from.as_deref(), to.as_deref(), json, &context).await?;
        }
        Commands::Show { id, json } => run_show(&id, json, &context).await?,
        Commands::Update {
            id,
            title,
            start,
            end,
            details,
        } => {
            let args = UpdateArgs {
                id: &id,
                title: title.as_deref(),
                start: start.as_deref(),
                end: end.as_deref(),
                details: &details,
            };
            run_update(args, &context).await?;
        }
        Commands::Delete { id } => run_delete(&id, &context).await?,
        Commands::Public { json } => run_public(json, &context).await?,
        Commands::Join { id } => run_join(&id, &context).await?,
        Commands::Sync => run_sync(&context).await?,
        Commands::Pending { json } => run_pending(json, &context).await?,
        Commands::Conflicts { limit, json } => run_conflicts(limit, json, &context).await?,
        Commands::DeadLetters { json } => run_dead_letters(json, &context).await?,
        Commands::Watch => run_watch(&context).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
