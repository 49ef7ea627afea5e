use std::net::SocketAddr;

use anyhow::Context;
use hub::{build_router, config::load_settings, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let app = build_router(AppState::new(&settings));

    let addr: SocketAddr = settings
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind))?;
    info!(%addr, default_room = %settings.default_room, "hub listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
