//! cs-unifi-bouncer - CrowdSec bouncer for UniFi firewalls

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cs_unifi_bouncer::cli::{Cli, Commands};
use cs_unifi_bouncer::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Version => {
            println!("cs-unifi-bouncer {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::CheckConfig => {
            let config = Config::load(cli.config.as_deref())?;
            cs_unifi_bouncer::commands::check_config::run(&config)
        }
        Commands::Run => {
            let config = Config::load(cli.config.as_deref())?;
            init_logging(&cli, config.tracing_level()?)?;
            cs_unifi_bouncer::commands::run::run(config).await
        }
    }
}

/// Flags win over the configured level.
fn init_logging(cli: &Cli, configured: Level) -> Result<()> {
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        configured
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false);

    if cli.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}
