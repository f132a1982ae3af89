//! XNAT Sync CLI application
//!
//! Command-line interface for verifying and repairing XNAT mirrors and for
//! renaming and sharing sessions on the primary archive.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use xnat_sync::cli::{handle_auth, handle_rename, handle_share, handle_verify, Cli, Commands};
use xnat_sync::config::AppConfig;
use xnat_sync::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    AppConfig::initialize_first_run().await?;
    let config = AppConfig::load(cli.global.config.clone()).await?;

    init_logging(&cli, &config);

    info!("XNAT Sync v{} starting", env!("CARGO_PKG_VERSION"));

    let quiet = cli.global.quiet;
    match cli.command {
        Commands::Verify(args) => {
            info!("Executing verify command");
            handle_verify(args, &config, quiet).await
        }
        Commands::Rename(args) => {
            info!("Executing rename command");
            handle_rename(args, &config).await
        }
        Commands::Share(args) => {
            info!("Executing share command");
            handle_share(args, &config).await
        }
        Commands::Auth(args) => {
            info!("Executing auth command");
            handle_auth(args, &config).await
        }
    }
}

/// Initialize logging from CLI verbosity, falling back to the config file level
fn init_logging(cli: &Cli, config: &AppConfig) {
    let explicit = cli.global.quiet || cli.global.verbose || cli.global.very_verbose;
    let level = if explicit {
        cli.log_level().to_string().to_lowercase()
    } else {
        config.logging.level.clone()
    };

    let filter = EnvFilter::from_default_env();
    let filter = match format!("xnat_sync={}", level).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter.add_directive(tracing::Level::WARN.into()),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
