//! Command-line entry point of the BigQuery File Extractor.

use bq_extractor::application::runtime::build_scheduler;
use bq_extractor::config::{load_env_file, AppConfig, CliArgs};
use clap::Parser;
use log::{error, info};
use std::process;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // 1. Initialize Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 2. Load the .env file, then parse Arguments
    match load_env_file(std::env::args()) {
        Ok(Some(path)) => info!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
    let args = CliArgs::parse();

    // 3. Load Config
    let mut config = match &args.config {
        Some(config_path) => match AppConfig::from_file(config_path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load config: {}", e);
                process::exit(1);
            }
        },
        None => AppConfig::default(),
    };

    // Merge CLI overrides
    config.merge_cli(&args);

    let settings = match config.resolve() {
        Ok(s) => s,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    // 4. Initialize Hexagonal Components
    let mut scheduler = match build_scheduler(&settings) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to initialize extractor: {}", e);
            process::exit(1);
        }
    };

    // 5. Run the extraction loop
    info!("Starting BigQuery extractor for {}", settings.source);
    scheduler.run().await;
}
