//! lvcache CLI entry point

use clap::Parser;
use console::style;
use lvcache::cli::{Cli, Commands};
use lvcache::config::{Config, ConfigManager};
use lvcache::error::LvCacheResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, config: &Config) {
    // 0 = warn, 1 = info, 2+ = debug
    let filter = match verbose {
        0 => EnvFilter::new("lvcache=warn"),
        1 => EnvFilter::new("lvcache=info"),
        _ => EnvFilter::new("lvcache=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

async fn run() -> LvCacheResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config);
    lvcache::ui::init_theme();

    if !matches!(cli.command, Commands::Config(_)) {
        ConfigManager::ensure_state_dirs(&config).await?;
    }

    match cli.command {
        Commands::Vg(args) => lvcache::cli::commands::vg(args, &config).await,
        Commands::Lv(args) => lvcache::cli::commands::lv(args, &config).await,
        Commands::Show(args) => lvcache::cli::commands::show(args, &config).await,
        Commands::Cache(args) => lvcache::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            lvcache::cli::commands::config(args, &config_manager, &config).await
        }
    }
}
