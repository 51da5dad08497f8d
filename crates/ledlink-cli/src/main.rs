//! ledlink - command line controller for the BLE LED peripheral

use clap::Parser;
use tracing::{error, info};

use ledlink_cli::{cli::Cli, commands::CommandDispatcher, config::AppConfig, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Some(data_dir) = &cli.data_dir {
        config.session.data_dir = Some(data_dir.into());
    }

    if let Err(e) = CommandDispatcher::execute(cli, config).await {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("ledlink exited");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
