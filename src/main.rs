use anyhow::{Context, Result};
use log::{error, info};

use catrat::build_rocket;
use catrat::common::ROCKET_RUNTIME;
use catrat::config::load_config;
use catrat::workflow::processors::setup::{check_scripts, initialize_folder, initialize_logger};

fn main() -> Result<()> {
    initialize_logger();

    let config = load_config().context("Failed to load configuration")?;
    initialize_folder(&config).context("Failed to initialize working directories")?;
    check_scripts(&config);
    info!(
        "Serving in {} mode",
        if config.auto_process { "auto-process" } else { "review" }
    );

    let result = ROCKET_RUNTIME.block_on(async { build_rocket(config).launch().await });
    if let Err(e) = result {
        error!("Rocket server failed: {}", e);
        return Err(anyhow::Error::from(e));
    }

    Ok(())
}
