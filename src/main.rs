//! Fieldcrypt - drive field-level encryption contexts from recorded replies.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fieldcrypt::cli::output;
use fieldcrypt::cli::{execute, Cli};
use fieldcrypt::error::{ClientError, ConfigError, Error};

fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber with env-filter support
    let filter = EnvFilter::try_from_env("FIELDCRYPT_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("fieldcrypt=debug")
        } else {
            EnvFilter::new("fieldcrypt=warn")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = execute(cli.command) {
        let error_msg = e.to_string();
        let suggestion = match &e {
            Error::Config(ConfigError::NotFound(_)) => {
                Some("pass --config or create fieldcrypt.toml")
            }
            Error::Config(ConfigError::MissingFixture(_)) => {
                Some("record the reply into the fixtures directory")
            }
            Error::Client(ClientError::MissingCredentials(_)) => {
                Some("add a [kms.<provider>] table to the config")
            }
            Error::Client(ClientError::InvalidNamespace(_)) => Some("use --ns <db>.<collection>"),
            _ => None,
        };

        output::error(&error_msg);
        if let Some(hint) = suggestion {
            output::hint(hint);
        }
        std::process::exit(1);
    }
}
