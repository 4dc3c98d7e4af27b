use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod args;
mod sync;

#[cfg(test)]
mod tests;

pub use args::{FeedArgs, FeedCommand, LogsArgs, MatchArgs, ProfileArgs, ProfileCommand};
pub use sync::{SyncArgs, SyncCommand};

#[derive(Debug, Parser)]
#[command(name = "lexmatch")]
#[command(about = "LexMatch matching core operator tools", version)]
pub struct Cli {
    #[arg(long, default_value = ".lexmatch")]
    pub root: PathBuf,

    /// TOML configuration; `LEXMATCH_*` environment variables override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log verbosity when `RUST_LOG` is unset (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Init,
    Profile(ProfileArgs),
    Match(MatchArgs),
    Sync(SyncArgs),
    Feed(FeedArgs),
    Logs(LogsArgs),
}
