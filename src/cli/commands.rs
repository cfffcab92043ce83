use crate::config::{DebugCriteria, ServerConfig};
use crate::echo::EchoHandler;
use crate::logging::{init_logging, LogConfig};
use crate::server::{Server, ServerHandle};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

/// Command-line interface for the SCGI application server
#[derive(Parser, Debug)]
#[command(name = "scgi-appserver")]
#[command(about = "SCGI application server with an elastic coroutine worker pool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the built-in echo handler
    Serve(ServerArgs),
    /// Resolve, validate and print the effective configuration
    CheckConfig(ServerArgs),
}

/// Flags shared by every command; each one overrides file and environment
#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub bind: Option<String>,

    #[arg(short, long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub min_workers: Option<usize>,

    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Idle seconds before a worker above the minimum is torn down
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Debug tag to enable (repeatable), e.g. `error` or `request`
    #[arg(long = "debug")]
    pub debug: Vec<String>,
}

impl ServerArgs {
    /// Defaults, then file, then `SCGI_*` environment, then flags
    ///
    /// # Errors
    ///
    /// Unreadable or invalid file, bad environment value, or a resulting
    /// configuration that fails validation.
    pub fn resolve(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        config.apply_env()?;

        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(n) = self.min_workers {
            config.min_workers = n;
        }
        if let Some(n) = self.max_workers {
            config.max_workers = n;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = secs;
        }
        if !self.debug.is_empty() {
            config.debug = DebugCriteria::new(self.debug.iter().cloned());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Execute a parsed command line
///
/// # Errors
///
/// Configuration, logging or startup failures.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve(args) => serve(&args),
        Commands::CheckConfig(args) => {
            let config = args.resolve()?;
            let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
            print!("{yaml}");
            Ok(())
        }
    }
}

fn serve(args: &ServerArgs) -> Result<()> {
    let config = args.resolve()?;
    let _log_guard = init_logging(&LogConfig::from_env())?;

    may::config().set_stack_size(config.stack_size);
    let handle = Server::with_factory(config, EchoHandler::for_worker)?
        .start()
        .context("Failed to start server")?;
    wait_for_shutdown(handle)
}

#[cfg(unix)]
fn wait_for_shutdown(handle: ServerHandle) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
    if let Some(sig) = signals.forever().next() {
        info!(signal = sig, "Shutdown signal received");
    }
    handle.stop();
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown(handle: ServerHandle) -> Result<()> {
    handle
        .join()
        .map_err(|e| anyhow::anyhow!("acceptor panicked: {e:?}"))
}
