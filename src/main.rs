use anyhow::Context;
use polywatch::app::App;
use polywatch::config::Config;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    config.init_logging();
    info!("polywatch starting");

    tokio::select! {
        result = App::run(config) => {
            result.context("monitoring loop exited")?;
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("polywatch stopped");
    Ok(())
}
