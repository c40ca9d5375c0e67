//! Medsync Server - Main entry point

use anyhow::Result;
use medsync_common::logging::{init_logging, LogConfig};
use tracing::info;

use medsync_server::{api, config::Config};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_config = LogConfig::builder()
        .log_file_prefix("medsync-server")
        .filter_directives("medsync_server=debug,tower_http=info,sqlx=warn")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Medsync Server");

    let config = Config::load()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        sources = config.catalog().iter().count(),
        "Configuration loaded"
    );

    api::serve(config).await
}
