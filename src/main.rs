use axum::serve;
use cohort_metadata_repo::api::routes::create_router;
use cohort_metadata_repo::config::AppConfig;
use cohort_metadata_repo::{build_collection, seed};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    println!("Cohort metadata repository");

    // Load configuration
    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    let collection = Arc::new(build_collection(&config));
    println!(
        "Local metadata collection {} ({})",
        collection.metadata_collection_id(),
        collection.identity().metadata_collection_name.as_deref().unwrap_or("unnamed")
    );

    // Starter types for demonstration (optional)
    if std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true" {
        println!("Loading starter types...");
        let added = seed::load_seed_types(&collection).await?;
        println!("{} starter types loaded", added);
    }

    run_server(create_router().with_state(collection), &config).await?;

    Ok(())
}

async fn run_server(app: axum::Router, config: &AppConfig) -> anyhow::Result<()> {
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!("Repository server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
