use std::path::PathBuf;

use clap::{Args, Subcommand};

#[derive(Debug, Args)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub command: ProfileCommand,
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommand {
    /// Stores a profile read from a JSON file, or stdin when the path is `-`.
    Put { input: PathBuf },
    Get { id: String },
    /// Hard-deletes a profile.
    Purge { id: String },
}

#[derive(Debug, Args)]
pub struct MatchArgs {
    /// JSON `MatchRequest` file, or `-` for stdin.
    pub request: PathBuf,

    /// Free text to embed as the query vector.
    #[arg(long)]
    pub text: Option<String>,
}

#[derive(Debug, Args)]
pub struct FeedArgs {
    #[command(subcommand)]
    pub command: FeedCommand,
}

#[derive(Debug, Subcommand)]
pub enum FeedCommand {
    Prune {
        #[arg(long, default_value_t = 10_000)]
        keep_latest: usize,
    },
}

#[derive(Debug, Args)]
pub struct LogsArgs {
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
    #[arg(long)]
    pub operation: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
}
