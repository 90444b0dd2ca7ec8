mod cli;
mod config;
mod storage;

use crate::cli::ConfigCommand;
use clap::Parser;
use color_eyre::Result;
use formvault_core::StorageBackend;
use formvault_storage::EncryptedStore;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();
    let config = config::load()?;
    init_tracing(&config);

    match cli.command {
        cli::Command::Init => {
            let store = storage::store_from_config(&config)?;
            store.initialize().await?;
            println!("Encryption key ready");
        }
        cli::Command::Save { key, json } => {
            let store = open_store(&config).await?;
            save_json(&store, &key, &json).await?;
            println!("Saved {key}");
        }
        cli::Command::Load { key } => {
            let store = open_store(&config).await?;
            match store.load::<Value>(&key).await {
                Some(model) => println!("{}", serde_json::to_string_pretty(&model)?),
                None => println!("No value for {key}"),
            }
        }
        cli::Command::Remove { key } => {
            let store = storage::store_from_config(&config)?;
            if !store.remove(&key).await {
                color_eyre::eyre::bail!("failed to remove {key}");
            }
            println!("Removed {key}");
        }
        cli::Command::Health => {
            let store = open_store(&config).await?;
            run_store_health(&store).await?;
            println!("Storage: ok");
        }
        cli::Command::Version => print_version(),
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
    }

    Ok(())
}

fn init_tracing(config: &config::Config) {
    // RUST_LOG wins, then the config file, then info.
    let fallback = config.log_filter.as_deref().unwrap_or("info");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("formvault {}", env!("CARGO_PKG_VERSION"));
}

async fn open_store(
    config: &config::Config,
) -> Result<EncryptedStore<formvault_storage::FileBackend>> {
    let store = storage::store_from_config(config)?;
    store.initialize().await?;
    Ok(store)
}

async fn save_json<B: StorageBackend>(
    store: &EncryptedStore<B>,
    key: &str,
    json: &str,
) -> Result<()> {
    let model: Value = serde_json::from_str(json)?;
    if !store.save(key, &model).await {
        color_eyre::eyre::bail!("failed to save {key}");
    }
    Ok(())
}

/// Save/load/remove a probe record through an initialized store.
async fn run_store_health<B: StorageBackend>(store: &EncryptedStore<B>) -> Result<()> {
    let probe_key = "health/probe";
    let payload = serde_json::json!({ "status": "ok" });

    if !store.save(probe_key, &payload).await {
        color_eyre::eyre::bail!("storage probe save failed");
    }
    let round_trip = store.load::<Value>(probe_key).await;
    if !store.remove(probe_key).await {
        color_eyre::eyre::bail!("storage probe remove failed");
    }

    if round_trip.as_ref() != Some(&payload) {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
