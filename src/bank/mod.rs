//! Bank participant
//!
//! Owns accounts and executes the participant half of the two-phase commit:
//! a `Prepare*` reserves (debit) or promises (credit) funds as a hold, the
//! matching `Commit*`/`Abort*` settles or releases it, and a background
//! sweeper expires holds whose coordinator went silent.
//!
//! State is flushed to disk on graceful shutdown only; live holds are not
//! persisted, so a restart implicitly aborts everything in flight.

pub mod accounts;
pub mod error;
pub mod handlers;
pub mod state;
pub mod store;
pub mod sweeper;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::AppConfig;
use crate::registry::{ServiceRegistry, bank_service};

pub use accounts::{AccountBook, HoldKind};
pub use error::BankError;
pub use state::BankState;
pub use store::BankStore;
pub use sweeper::{HoldSweeper, SweeperConfig};

/// Build the participant router.
pub fn router(state: Arc<BankState>) -> Router {
    let tx_routes = Router::new()
        .route("/prepare/debit", post(handlers::prepare_debit))
        .route("/prepare/credit", post(handlers::prepare_credit))
        .route("/commit/debit", post(handlers::commit_debit))
        .route("/commit/credit", post(handlers::commit_credit))
        .route("/abort/debit", post(handlers::abort_debit))
        .route("/abort/credit", post(handlers::abort_credit));

    Router::new()
        .route("/api/v1/ping", get(handlers::ping))
        .route("/api/v1/authenticate", post(handlers::authenticate))
        .nest("/api/v1/tx", tx_routes)
        .route("/api/v1/balance/{username}", get(handlers::get_balance))
        .route("/api/v1/history/{username}", get(handlers::get_history))
        .with_state(state)
}

/// Load state, bind, register, serve until shutdown, then flush and
/// deregister. `port` overrides the configured one (0 = ephemeral).
pub async fn run_server(config: &AppConfig, name: &str, port: Option<u16>) -> Result<()> {
    let store = Arc::new(BankStore::new(
        std::path::Path::new(&config.bank.data_dir),
        std::path::Path::new(&config.bank.credentials_dir),
        name,
    ));
    let snapshot = store.load()?;
    let book = Arc::new(AccountBook::from_snapshot(snapshot, config.hold_ttl()));
    let state = Arc::new(BankState::new(name, book.clone(), store.clone()));

    let sweeper = HoldSweeper::new(
        book.clone(),
        SweeperConfig {
            interval: std::time::Duration::from_millis(config.bank.sweep_interval_ms),
        },
    );
    tokio::spawn(async move { sweeper.run().await });

    let bind_addr = format!(
        "{}:{}",
        config.bank.host,
        port.unwrap_or(config.bank.port)
    );
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    let local_addr = listener.local_addr().context("No local address")?;

    let registry = ServiceRegistry::new(&config.registry.path);
    let service_name = bank_service(name);
    registry
        .register(&service_name, &local_addr.to_string())
        .context("Failed to register with the service registry")?;

    info!(bank = name, addr = %local_addr, "Bank participant listening");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Graceful shutdown: flush balances + applied commits, drop holds.
    state.store.save(&state.book.to_snapshot())?;
    registry
        .deregister(&service_name)
        .context("Failed to deregister from the service registry")?;

    info!(bank = name, "Bank participant stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
