//! # CLI Module
//!
//! Command line for the `scgi-appserver` binary.
//!
//! ```bash
//! # Serve the echo handler on 0.0.0.0:4000 with up to 32 workers
//! scgi-appserver serve --bind 0.0.0.0 --max-workers 32
//!
//! # Expose fault detail in error bodies
//! scgi-appserver serve --config server.yaml --debug error
//!
//! # Show what a config file resolves to after env and flag overrides
//! SCGI_PORT=9000 scgi-appserver check-config --config server.yaml
//! ```

mod commands;

#[cfg(test)]
mod tests;

pub use commands::{run_cli, Cli, Commands, ServerArgs};
