use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "agenda")]
#[command(about = "Offline-first calendar from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// API base URL (overrides AGENDA_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Access token (overrides AGENDA_ACCESS_TOKEN)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new event
    #[command(alias = "new")]
    Add {
        /// Event title
        #[arg(required = true)]
        title: Vec<String>,
        /// Start time (RFC 3339, `YYYY-MM-DD HH:MM` local, or `YYYY-MM-DD`)
        #[arg(short, long, value_name = "WHEN")]
        start: String,
        /// End time; defaults to start + duration
        #[arg(short, long, value_name = "WHEN", conflicts_with = "duration")]
        end: Option<String>,
        /// Duration in minutes when no end is given
        #[arg(short, long, value_name = "MINUTES", default_value = "60")]
        duration: i64,
        #[command(flatten)]
        details: EventDetails,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List events, optionally within a window
    List {
        /// Window start
        #[arg(long, value_name = "WHEN", requires = "to")]
        from: Option<String>,
        /// Window end
        #[arg(long, value_name = "WHEN", requires = "from")]
        to: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one event
    Show {
        /// Event ID (negative for events not yet synced)
        #[arg(allow_hyphen_values = true)]
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change an existing event
    #[command(alias = "edit")]
    Update {
        /// Event ID (negative for events not yet synced)
        #[arg(allow_hyphen_values = true)]
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New start time
        #[arg(short, long, value_name = "WHEN")]
        start: Option<String>,
        /// New end time
        #[arg(short, long, value_name = "WHEN")]
        end: Option<String>,
        #[command(flatten)]
        details: EventDetails,
    },
    /// Delete an event
    Delete {
        /// Event ID (negative for events not yet synced)
        #[arg(allow_hyphen_values = true)]
        id: String,
    },
    /// List public events on the server
    Public {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Copy a public event into your calendar
    Join {
        /// Public event ID
        id: String,
    },
    /// Replay queued changes and refresh the local cache
    Sync,
    /// List changes waiting to be synced
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently detected sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List changes that were given up on
    DeadLetters {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stay connected: sync on reconnect and print live changes
    Watch,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

/// Optional fields shared by `add` and `update`.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct EventDetails {
    /// Longer description
    #[arg(long)]
    pub description: Option<String>,
    /// Where it happens
    #[arg(long)]
    pub location: Option<String>,
    /// Color as #RRGGBB
    #[arg(long)]
    pub color: Option<String>,
    /// Who can see the event
    #[arg(long, value_enum)]
    pub visibility: Option<VisibilityArg>,
    /// Mark as an all-day event
    #[arg(long)]
    pub all_day: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum VisibilityArg {
    Public,
    Private,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
