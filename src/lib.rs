pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::{ErrorKind, OmrsError, OmrsResult};

pub use logic::{LocalMetadataCollection, Removal, RepositoryHandler, RepositoryValidator};

// Export all model types
pub use model::*;

pub use store::{InMemoryStore, MetadataStore, TypeRegistry};

use std::sync::Arc;

/// Assemble the local metadata collection described by the configuration
pub fn build_collection(config: &config::AppConfig) -> LocalMetadataCollection<InMemoryStore> {
    let identity = config.identity();
    let store = InMemoryStore::new()
        .with_soft_delete(config.repository.softdelete)
        .with_metadata_collection_id(
            identity.metadata_collection_id.clone(),
            identity.metadata_collection_name.clone(),
        );

    let mut collection =
        LocalMetadataCollection::new(identity, Arc::new(store), Arc::new(TypeRegistry::new()))
            .with_max_page_size(config.repository.pagesize);
    if config.repository.events {
        collection = collection.with_emitter(Arc::new(events::LoggingEventEmitter));
    }
    collection
}

// Function for integration testing
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let config = crate::config::AppConfig::load()?;

    let collection = Arc::new(build_collection(&config));
    if std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true" {
        seed::load_seed_types(&collection).await?;
    }

    let app = crate::api::routes::create_router().with_state(collection);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_build_collection_uses_configured_identity() {
        let mut config = AppConfig::default();
        config.repository.collection = Some("mc-configured".to_string());
        config.repository.softdelete = false;

        let collection = build_collection(&config);
        assert_eq!(collection.metadata_collection_id(), "mc-configured");
        assert!(!collection.store().supports_soft_delete());
    }
}
