use std::io::{self, BufRead};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use lexmatch_core::config::IndexBackend;
use lexmatch_core::models::{MatchRequest, Profile};
use lexmatch_core::{AppConfig, MatchingCore};
use tracing::info;

use crate::cli::{Commands, FeedCommand, ProfileCommand, SyncCommand};

mod support;


use self::support::{print_json, read_json_input};

pub(crate) fn run_from_root(root: &Path, config: Option<&Path>, command: Commands) -> Result<()> {
    let config = AppConfig::load(config).context("failed to load configuration")?;
    let core = MatchingCore::open(root, config).context("failed to open matching core")?;
    core.initialize().context("failed to prepare search index")?;
    if core.config().index.backend == IndexBackend::Memory {
        rebuild_memory_index(&core)?;
    }
    run(&core, command)
}

/// Operation label used when reporting a failed command.
pub(crate) fn operation_name(command: &Commands) -> &'static str {
    match command {
        Commands::Init => "init",
        Commands::Profile(args) => match args.command {
            ProfileCommand::Put { .. } => "profile.put",
            ProfileCommand::Get { .. } => "profile.get",
            ProfileCommand::Purge { .. } => "profile.purge",
        },
        Commands::Match(_) => "match.find",
        Commands::Sync(args) => match args.command {
            SyncCommand::Full => "sync.full",
            SyncCommand::Incremental => "sync.incremental",
            SyncCommand::Verify => "sync.verify",
            SyncCommand::Status => "sync.status",
            SyncCommand::Drain => "sync.feed",
            SyncCommand::Run { .. } => "sync.run",
            SyncCommand::ClearDeadLetters { .. } => "sync.clear_dead_letters",
        },
        Commands::Feed(_) => "feed.prune",
        Commands::Logs(_) => "logs.list",
    }
}

/// The memory index lives only as long as this process, so it is rebuilt
/// from the profile store before any command reads it.
fn rebuild_memory_index(core: &MatchingCore) -> Result<()> {
    let report = core
        .trigger_full_resync()
        .context("failed to rebuild in-memory index")?;
    info!(indexed = report.indexed, "in-memory index rebuilt");
    Ok(())
}

fn run(core: &MatchingCore, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            print_json(&serde_json::json!({
                "status": "ok",
                "root": core.root().display().to_string(),
            }))?;
        }
        Commands::Profile(args) => match args.command {
            ProfileCommand::Put { input } => {
                let profile = read_json_input::<Profile>(&input)?;
                let stored = core.put_profile(profile)?;
                print_json(&stored)?;
            }
            ProfileCommand::Get { id } => {
                print_json(&core.get_profile(&id)?)?;
            }
            ProfileCommand::Purge { id } => {
                let removed = core.purge_profile(&id)?;
                print_json(&serde_json::json!({
                    "status": "ok",
                    "id": id,
                    "removed": removed,
                }))?;
            }
        },
        Commands::Match(args) => {
            let request = read_json_input::<MatchRequest>(&args.request)?;
            let result = match args.text.as_deref() {
                Some(text) => core.find_matches_for_text(text, &request)?,
                None => core.find_matches(&request)?,
            };
            print_json(&result)?;
        }
        Commands::Sync(args) => match args.command {
            SyncCommand::Full => print_json(&core.trigger_full_resync()?)?,
            SyncCommand::Incremental => print_json(&core.run_incremental_sync()?)?,
            SyncCommand::Verify => print_json(&core.verify_consistency()?)?,
            SyncCommand::Status => print_json(&core.get_sync_status()?)?,
            SyncCommand::Drain => print_json(&core.drain_change_feed()?)?,
            SyncCommand::Run { duration_secs } => {
                run_sync_workers(core, duration_secs)?;
                print_json(&core.get_sync_status()?)?;
            }
            SyncCommand::ClearDeadLetters { ids } => {
                let removed = core.clear_dead_letters(&ids)?;
                print_json(&serde_json::json!({
                    "status": "ok",
                    "removed": removed,
                }))?;
            }
        },
        Commands::Feed(args) => match args.command {
            FeedCommand::Prune { keep_latest } => {
                let removed = core.prune_change_log(keep_latest)?;
                print_json(&serde_json::json!({
                    "status": "ok",
                    "keep_latest": keep_latest,
                    "removed": removed,
                }))?;
            }
        },
        Commands::Logs(args) => {
            let entries = core.list_request_logs(
                args.limit,
                args.operation.as_deref(),
                args.status.as_deref(),
            )?;
            print_json(&entries)?;
        }
    }
    Ok(())
}

fn run_sync_workers(core: &MatchingCore, duration_secs: Option<u64>) -> Result<()> {
    let workers = core
        .start_sync_workers()
        .context("failed to start sync workers")?;
    match duration_secs {
        Some(secs) => thread::sleep(Duration::from_secs(secs)),
        None => {
            info!("sync workers running; close stdin to stop");
            for line in io::stdin().lock().lines() {
                line?;
            }
        }
    }
    workers.shutdown();
    info!("sync workers stopped");
    Ok(())
}
