use std::process::ExitCode;

use tracing::{error, info};

use streamcast::{config, supervisor, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Logging is configured from the settings (dev mode changes level and
    // format), so a config failure falls back to the defaults before being
    // reported.
    let settings = match config::load_config() {
        Ok(settings) => settings,
        Err(e) => {
            utils::logging::init("info", false);
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    utils::logging::init(if settings.dev { "debug" } else { "info" }, settings.dev);
    info!("streamcast starting up");

    match supervisor::run(settings).await {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
