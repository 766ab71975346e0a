use anyhow::Context;
use clap::Parser;
use farm_client::{ClientArgs, ClientConfig, FarmClient, demo};
use farm_core::{proto::Item, store::RecordStore};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = ClientArgs::parse();
    let config = ClientConfig::try_from(args)?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339()),
        )
        .init();

    let store = RecordStore::load(&config.data_file)
        .with_context(|| format!("failed to load {}", config.data_file.display()))?;
    let items: Vec<Item> = store.existing().filter_map(|record| record.item.clone()).collect();

    let mut client = FarmClient::connect(&config).await?;

    let failed = demo::run(&mut client, &items, config.chat_timeout).await;
    if failed > 0 {
        tracing::warn!(failed, "Demo finished with failed steps");
    }

    Ok(())
}
