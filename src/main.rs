//! AegisX WAF decision core — entry point.
//!
//! Wires configuration, the `Core` pipeline and the HTTP surface together,
//! mirroring the teacher's `main()` shape: JSON structured logging, a
//! background eviction task, and graceful shutdown on Ctrl-C.

mod api;
mod broadcast;
mod config;
mod decision;
mod error;
mod eventlog;
mod features;
mod gateway;
mod geoip;
mod inference;
mod model;
mod signatures;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gateway::Core;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "aegisx_waf_core=info,tower_http=info".into()))
        .json()
        .init();

    let config = config::Config::load();
    info!(
        port = config.port,
        fail_open = config.fail_open,
        dry_run = config.dry_run,
        redis_host = config.redis_host,
        redis_port = config.redis_port,
        "AegisX WAF decision core starting"
    );

    let core = Arc::new(Core::new(config.clone()).unwrap_or_else(|e| {
        eprintln!("[FATAL] failed to initialize decision core: {e}");
        std::process::exit(1);
    }));

    tokio::spawn(sweep_task(core.clone()));

    let app = api::router(core);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        eprintln!("[FATAL] could not bind port {}: {e}", config.port);
        eprintln!("the port is likely already in use; set PORT to another value");
        std::process::exit(1);
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await
        .unwrap_or_else(|e| {
            eprintln!("[FATAL] server error: {e}");
            std::process::exit(1);
        });
}

/// Periodic TTL sweep of the in-process counter store, mirroring the
/// teacher's `eviction()` background task.
async fn sweep_task(core: Arc<Core>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        core.sweep_expired();
    }
}
