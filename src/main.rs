use agora_metrics::cli::{commands, Cli};
use clap::Parser;
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if cli.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.expect("Failed to set tracing subscriber");

    info!("Starting agora-metrics v{}", agora_metrics::VERSION);

    let result = match cli.command {
        Some(command) => commands::handle_command(&cli.target, &cli.scrape, command).await,
        None => {
            eprintln!("No command specified. Use --help for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
