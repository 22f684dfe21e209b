//! Command-line interface.

pub mod output;
pub mod replay;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fieldcrypt - drive field-level encryption contexts from recorded replies.
#[derive(Parser)]
#[command(
    name = "fieldcrypt",
    about = "Drive field-level encryption contexts from recorded replies",
    version
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Command {
    /// Run one context to completion, answering every request from a
    /// fixture directory. The resulting document is written to stdout.
    Replay {
        /// Harness configuration (credentials, schema map)
        #[arg(short, long, env = "FIELDCRYPT_CONFIG", default_value = "fieldcrypt.toml")]
        config: PathBuf,
        /// Directory holding recorded replies
        #[arg(short, long)]
        fixtures: PathBuf,
        /// Feed KMS replies in chunks of this many bytes (0 feeds each reply whole)
        #[arg(long, default_value_t = 0)]
        chunk_size: usize,
        /// Pretty-print the resulting document
        #[arg(long)]
        pretty: bool,
        #[command(subcommand)]
        operation: ReplayOperation,
    },
}

/// What the replayed context does.
#[derive(Subcommand)]
pub enum ReplayOperation {
    /// Encrypt the command the analyzer reply describes
    Encrypt {
        /// Target namespace, `<db>.<collection>`
        #[arg(long)]
        ns: String,
    },
    /// Decrypt a document
    Decrypt {
        /// Extended JSON document to decrypt
        #[arg(long)]
        input: PathBuf,
    },
}

/// Execute a command.
pub fn execute(command: Command) -> crate::error::Result<()> {
    match command {
        Command::Replay {
            config,
            fixtures,
            chunk_size,
            pretty,
            operation,
        } => replay::execute(&replay::ReplayArgs {
            config,
            fixtures,
            chunk_size,
            pretty,
            operation,
        }),
    }
}
