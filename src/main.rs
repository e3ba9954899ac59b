use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use request_logger::{config::AppConfig, routes, TracingLogger};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::load()?);

    // The request logger doubles as the process-wide subscriber
    let logger = TracingLogger::from_config(&config.logging)?;
    logger.install_global()?;
    info!(
        level = %config.logging.level,
        output = %config.logging.output,
        "Logger initialized"
    );

    let app = routes::app(config.clone(), &logger);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Request logger demo listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
