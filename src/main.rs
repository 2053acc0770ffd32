use std::process::ExitCode;

use clap::Parser;
use migration_gate::app::App;
use migration_gate::cli::Cli;
use migration_gate::constants::EXIT_CONFIGURATION_ERROR;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "migration_gate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match App::new(cli).run().await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("migration-gate error: {}", err);
            ExitCode::from(EXIT_CONFIGURATION_ERROR)
        }
    }
}
