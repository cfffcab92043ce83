//! Unit tests for CLI argument handling

use crate::cli::{Cli, Commands, ServerArgs};
use clap::Parser;
use std::io::Write;

fn serve_args(argv: &[&str]) -> ServerArgs {
    let mut full = vec!["scgi-appserver", "serve"];
    full.extend_from_slice(argv);
    match Cli::try_parse_from(full).unwrap().command {
        Commands::Serve(args) => args,
        other => panic!("Expected Serve command, got {other:?}"),
    }
}

#[test]
fn test_serve_flags_parse() {
    let args = serve_args(&[
        "--port",
        "0",
        "--max-workers",
        "3",
        "--debug",
        "error",
        "--debug",
        "request",
    ]);
    assert_eq!(args.port, Some(0));
    assert_eq!(args.max_workers, Some(3));
    assert_eq!(args.debug, vec!["error", "request"]);
}

#[test]
fn test_flags_override_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port: 9000\nmax_workers: 8\nmin_workers: 1").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let config = serve_args(&["--config", &path, "--max-workers", "4"])
        .resolve()
        .unwrap();
    assert_eq!(config.port, 9000);
    assert_eq!(config.max_workers, 4);
    assert_eq!(config.min_workers, 1);
}

#[test]
fn test_invalid_combination_rejected() {
    let err = serve_args(&["--min-workers", "5", "--max-workers", "2"])
        .resolve()
        .unwrap_err();
    assert!(err.to_string().contains("max_workers"));
}

#[test]
fn test_check_config_command_exists() {
    let cli = Cli::try_parse_from(["scgi-appserver", "check-config", "--port", "4100"]).unwrap();
    match cli.command {
        Commands::CheckConfig(args) => assert_eq!(args.port, Some(4100)),
        other => panic!("Expected CheckConfig command, got {other:?}"),
    }
}
