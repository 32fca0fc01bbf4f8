// ABOUTME: HTTP server binary exposing the gatehouse authentication routes
// ABOUTME: Wires configuration, cache, user store, and auth context, then serves with graceful shutdown
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Gatehouse Server Binary
//!
//! Starts the authentication API. Configuration comes from the environment;
//! the port and database URL can be overridden on the command line.

use anyhow::Result;
use clap::Parser;
use gatehouse::{
    auth::AuthOrchestrator,
    cache::Cache,
    config::{DatabaseUrl, ServerConfig},
    constants::server::MAX_REQUEST_BODY_BYTES,
    context::{AuthContext, Collaborators},
    routes, store,
};
use std::net::SocketAddr;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gatehouse-server")]
#[command(about = "Gatehouse - authentication and session service")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Override the user store (`sqlite:path`, `sqlite::memory:`, or `memory`)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(url) = &args.database_url {
        config.database = DatabaseUrl::parse_url(url)?;
    }

    config.logging.init()?;
    info!("Starting gatehouse");
    info!("{}", config.summary());

    let cache = Cache::from_config(config.cache.clone()).await?;
    info!(backend = cache.backend_name(), "Cache initialized");
    let users = store::open(&config.database).await?;

    let ctx = AuthContext::build(
        config.auth.clone(),
        config.rate_guard.clone(),
        cache,
        users,
        Collaborators::default(),
    )?;
    let orchestrator = AuthOrchestrator::new(ctx);

    let app = routes::router(orchestrator).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.request_timeout_secs,
            )))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
