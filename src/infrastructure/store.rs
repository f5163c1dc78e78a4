use crate::config::AppConfig;
use crate::services::store::{Store, create_store};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

pub async fn setup_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    let store = create_store(config).context("Failed to create store")?;

    store
        .init()
        .await
        .with_context(|| format!("Failed to initialize {} store", config.store_backend))?;
    info!("🗄️  Store backend '{}' initialized", config.store_backend);

    Ok(store.into())
}
