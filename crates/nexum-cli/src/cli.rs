//! Clap CLI definitions for Nexum.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Nexum — remote object invocation over TCP.
#[derive(Parser)]
#[command(
    name = "nexum",
    version,
    about = "Nexum — call methods on objects hosted in another process",
    long_about = "Nexum — remote object invocation over TCP.\n\n\
                  Serve a controller hosting named objects, then call their\n\
                  methods from other machines with authenticated, encrypted\n\
                  sessions and per-method authorization."
)]
pub struct Cli {
    /// Path to config file (defaults to ~/.nexum/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a controller hosting the built-in `kv` object.
    Serve,
    /// Invoke one method on a registered object and print the result.
    Call {
        /// Registered object name.
        object: String,
        /// Method to invoke.
        method: String,
        /// Positional arguments as a JSON array, e.g. '[2, 3]'.
        args: Option<String>,
        /// Named arguments as a JSON object, e.g. '{"by": 7}'.
        #[arg(long)]
        named: Option<String>,
        #[command(flatten)]
        target: Target,
    },
    /// List the objects registered on a controller.
    Objects {
        #[command(flatten)]
        target: Target,
    },
}

/// Where to connect and how to authenticate.
#[derive(clap::Args)]
pub struct Target {
    /// Controller host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Controller port.
    #[arg(long, default_value_t = nexum_types::config::DEFAULT_PORT)]
    pub port: u16,
    /// Shared secret for the handshake.
    #[arg(long)]
    pub secret: Option<String>,
}
