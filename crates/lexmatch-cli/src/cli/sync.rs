use clap::{Args, Subcommand};

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: SyncCommand,
}

#[derive(Debug, Subcommand)]
pub enum SyncCommand {
    /// Re-index every stored profile.
    Full,
    Incremental,
    Verify,
    Status,
    /// Apply pending change-feed events and exit.
    Drain,
    /// Run the background sync workers.
    Run {
        /// Stop after this many seconds; without it the workers run until stdin closes.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Remove dead letters by id, or all of them when none are given.
    ClearDeadLetters {
        #[arg(long = "id")]
        ids: Vec<i64>,
    },
}
