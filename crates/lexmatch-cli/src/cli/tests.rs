use std::path::PathBuf;

use super::*;
use clap::Parser;

#[test]
fn root_and_config_are_global_options() {
    let cli = Cli::try_parse_from([
        "lexmatch",
        "--root",
        "/tmp/lex",
        "--config",
        "lexmatch.toml",
        "init",
    ])
    .expect("parse");
    assert_eq!(cli.root, PathBuf::from("/tmp/lex"));
    assert_eq!(cli.config, Some(PathBuf::from("lexmatch.toml")));
    assert!(matches!(cli.command, Commands::Init));
}

#[test]
fn root_defaults_to_dot_lexmatch() {
    let cli = Cli::try_parse_from(["lexmatch", "sync", "status"]).expect("parse");
    assert_eq!(cli.root, PathBuf::from(".lexmatch"));
    assert!(matches!(
        cli.command,
        Commands::Sync(SyncArgs {
            command: SyncCommand::Status
        })
    ));
}

#[test]
fn profile_put_takes_input_path() {
    let cli = Cli::try_parse_from(["lexmatch", "profile", "put", "-"]).expect("parse");
    match cli.command {
        Commands::Profile(ProfileArgs {
            command: ProfileCommand::Put { input },
        }) => assert_eq!(input, PathBuf::from("-")),
        _ => panic!("expected profile put command"),
    }
}

#[test]
fn match_parses_optional_text() {
    let cli = Cli::try_parse_from([
        "lexmatch",
        "match",
        "request.json",
        "--text",
        "landlord refuses to return deposit",
    ])
    .expect("parse");
    match cli.command {
        Commands::Match(MatchArgs { request, text }) => {
            assert_eq!(request, PathBuf::from("request.json"));
            assert_eq!(text.as_deref(), Some("landlord refuses to return deposit"));
        }
        _ => panic!("expected match command"),
    }
}

#[test]
fn sync_run_parses_duration() {
    let cli =
        Cli::try_parse_from(["lexmatch", "sync", "run", "--duration-secs", "30"]).expect("parse");
    match cli.command {
        Commands::Sync(SyncArgs {
            command: SyncCommand::Run { duration_secs },
        }) => assert_eq!(duration_secs, Some(30)),
        _ => panic!("expected sync run command"),
    }
}

#[test]
fn clear_dead_letters_collects_repeated_ids() {
    let cli = Cli::try_parse_from([
        "lexmatch",
        "sync",
        "clear-dead-letters",
        "--id",
        "3",
        "--id",
        "9",
    ])
    .expect("parse");
    match cli.command {
        Commands::Sync(SyncArgs {
            command: SyncCommand::ClearDeadLetters { ids },
        }) => assert_eq!(ids, vec![3, 9]),
        _ => panic!("expected clear-dead-letters command"),
    }
}

#[test]
fn feed_prune_defaults_keep_latest() {
    let cli = Cli::try_parse_from(["lexmatch", "feed", "prune"]).expect("parse");
    match cli.command {
        Commands::Feed(FeedArgs {
            command: FeedCommand::Prune { keep_latest },
        }) => assert_eq!(keep_latest, 10_000),
        _ => panic!("expected feed prune command"),
    }
}

#[test]
fn verbose_flag_counts() {
    let cli = Cli::try_parse_from(["lexmatch", "-vv", "logs"]).expect("parse");
    assert_eq!(cli.verbose, 2);
}

#[test]
fn unknown_sync_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["lexmatch", "sync", "repair"]).is_err());
}
