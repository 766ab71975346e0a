use anyhow::Context;
use clap::Parser;
use farm_core::store::RecordStore;
use farm_server::{
    CliArgs, ServerConfig, ServerHandle, server::telemetry::init_telemetry, shutdown_signal,
};
use std::sync::Arc;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    // Never serve from a partial store.
    let store = RecordStore::load(&config.data_file)
        .with_context(|| format!("failed to load {}", config.data_file.display()))?;

    let handle = ServerHandle::start(config, Arc::new(store)).await?;
    let result = handle.run_until(shutdown_signal()).await;

    providers.shutdown();
    result
}
