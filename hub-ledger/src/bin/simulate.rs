//! Randomized simulation binary
//!
//! Usage: `hub-ledger-sim [config.toml]`. Without a path the configuration
//! comes from `HUB_LEDGER_*` environment variables over the defaults.

use anyhow::Context;
use hub_ledger::driver::Driver;
use hub_ledger::{spawn_simulation_actor, SimulationConfig, System};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => SimulationConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => SimulationConfig::from_env()?,
    };

    info!(
        "Configuration loaded - spokes: {}, users: {}, depth: {}, seed: {}",
        config.system.num_spokes,
        config.system.num_users,
        config.driver.depth,
        config.system.seed
    );

    let system = System::new(&config)?;
    let handle = spawn_simulation_actor(system);

    let summary = Driver::from_config(handle.clone(), &config)
        .await?
        .run()
        .await?;

    info!(
        "ran {} iterations with {} spokes and {} users",
        summary.steps, config.system.num_spokes, config.system.num_users
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("{}", handle.metrics().await?);

    handle.shutdown().await?;
    Ok(())
}
