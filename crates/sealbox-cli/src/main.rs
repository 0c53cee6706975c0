mod cli;
mod config;
mod storage;

use clap::Parser;
use color_eyre::Result;
use sealbox_core::SecureStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::ConfigCommand;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Encrypt { plaintext } => {
            let store = storage::store_from_config(&config, cli.key)?;
            let sealed = store.encrypt(&plaintext).await.map_err(to_eyre)?;
            println!("{sealed}");
        }
        cli::Command::Decrypt { envelope } => {
            let store = storage::store_from_config(&config, cli.key)?;
            let plaintext = store.decrypt(&envelope).await.map_err(to_eyre)?;
            println!("{plaintext}");
        }
        cli::Command::ExportKey => {
            let store = storage::store_from_config(&config, cli.key)?;
            store.establish_key().await.map_err(to_eyre)?;
            match store.current_key_base64().await.map_err(to_eyre)? {
                Some(key) => println!("{key}"),
                None => println!("key is not exportable"),
            }
        }
        cli::Command::Clear => {
            let store = storage::store_from_config(&config, cli.key)?;
            store.clear_all_data().await.map_err(to_eyre)?;
            println!("Store cleared");
        }
        cli::Command::Health => {
            let store = storage::store_from_config(&config, cli.key)?;
            run_store_health(&store).await?;
            println!("Store: ok");
        }
        cli::Command::Version => print_version(),
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("sealbox {}", env!("CARGO_PKG_VERSION"));
}

/// Encrypt/decrypt round-trip probe.
async fn run_store_health(store: &SecureStore) -> Result<()> {
    let payload = "health probe";
    let sealed = store.encrypt(payload).await.map_err(to_eyre)?;
    let round_trip = store.decrypt(&sealed).await.map_err(to_eyre)?;
    if round_trip != payload {
        color_eyre::eyre::bail!("store round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

fn to_eyre(err: sealbox_core::SecureStoreError) -> color_eyre::eyre::Report {
    color_eyre::eyre::eyre!(err.to_string())
}
