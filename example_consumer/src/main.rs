//! Demo application on switchboard-sdk.
//!
//! Run from repo root: `cargo run -p example-consumer -- --port=3001`
//! Without `DATABASE_URL` the in-memory data source is used.

mod controllers;

use std::sync::Arc;

use switchboard_sdk::{Application, MemoryDataSource, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("switchboard_sdk=info,example_consumer=info")),
        )
        .init();

    let in_memory = config.database_url.is_none();
    let mut app = Application::new(config);
    if in_memory {
        tracing::info!("DATABASE_URL not set, using in-memory data source");
        app = app.with_data_source(Arc::new(MemoryDataSource::new()));
    }
    controllers::register(&mut app)?;
    app.run().await?;
    Ok(())
}
