use clap::Parser;
use scgi_appserver::cli::{run_cli, Cli};

fn main() -> anyhow::Result<()> {
    run_cli(Cli::parse())
}
