//! Transaction coordinator
//!
//! Authenticates users against their banks, issues bearer tokens, and
//! drives two-phase commit for transfers. The idempotency registry plus the
//! durable decision log guarantee that a txid decided once is never
//! executed again, across duplicates, retries, and coordinator restarts.
//!
//! Crash recovery deliberately aborts: an in-flight txid found in the log
//! without a decision is recorded as aborted and a best-effort abort is
//! sent to its last-known participants. Holds left at banks expire on their
//! own deadline regardless.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod participants;
pub mod state;
pub mod twopc;
pub mod wal;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::core_types::{Subject, TxId};
use crate::registry::{COORDINATOR, ServiceRegistry};
use crate::token::TokenService;

pub use error::CoordinatorError;
pub use idempotency::{TxRegistry, TxState};
pub use participants::{BankDirectory, HttpBank};
pub use state::CoordinatorState;
pub use twopc::{Participant, TwoPcConfig, TwoPhaseCoordinator};
pub use wal::{DecisionLog, LogRecord};

/// An in-flight txid recovered from the log without a decision.
#[derive(Debug, Clone)]
pub struct OrphanTx {
    pub txid: TxId,
    pub src_bank: String,
    pub dst_bank: String,
}

/// Rebuild the idempotency registry from the decision log.
///
/// Returns the registry plus the orphans (Begin without Decision); the
/// caller records those as aborted and sweeps them.
pub fn recover(log_path: &Path) -> std::io::Result<(Arc<TxRegistry>, Vec<OrphanTx>)> {
    let mut begins: HashMap<TxId, idempotency::TxEntry> = HashMap::new();
    let mut orphan_banks: HashMap<TxId, (String, String)> = HashMap::new();
    let mut decided: HashMap<TxId, TxState> = HashMap::new();

    let replayed = DecisionLog::replay(log_path, |record| match record {
        LogRecord::Begin {
            txid,
            src_bank,
            src_user,
            dst_bank,
            dst_user,
            amount,
            ts_ms,
        } => {
            orphan_banks.insert(txid, (src_bank.clone(), dst_bank.clone()));
            begins.insert(
                txid,
                idempotency::TxEntry {
                    txid,
                    state: TxState::InFlight,
                    src: Subject::new(src_bank, src_user),
                    dst: Subject::new(dst_bank, dst_user),
                    amount,
                    started_at_ms: ts_ms,
                },
            );
        }
        LogRecord::Decision {
            txid,
            committed,
            reason,
            ..
        } => {
            let state = if committed {
                TxState::Committed
            } else {
                TxState::Aborted {
                    reason: reason.unwrap_or_else(|| "aborted".to_string()),
                }
            };
            decided.insert(txid, state);
        }
    })?;

    let registry = Arc::new(TxRegistry::new());
    let mut orphans = Vec::new();

    for (txid, mut entry) in begins {
        match decided.remove(&txid) {
            Some(state) => {
                entry.state = state;
                registry.restore(entry);
            }
            None => {
                entry.state = TxState::Aborted {
                    reason: "coordinator_restart".to_string(),
                };
                registry.restore(entry);
                if let Some((src_bank, dst_bank)) = orphan_banks.remove(&txid) {
                    orphans.push(OrphanTx {
                        txid,
                        src_bank,
                        dst_bank,
                    });
                }
            }
        }
    }

    for txid in decided.keys() {
        warn!(txid = %txid, "Decision without Begin in log, skipping");
    }

    info!(
        records = replayed,
        entries = registry.len(),
        orphans = orphans.len(),
        "Recovered idempotency registry from decision log"
    );
    Ok((registry, orphans))
}

/// Build the coordinator router.
pub fn router(state: Arc<CoordinatorState>) -> Router {
    let public_routes = Router::new()
        .route("/ping", get(handlers::ping))
        .route("/login", post(handlers::login));

    let private_routes = Router::new()
        .route("/transfer", post(handlers::transfer))
        .route("/balance", get(handlers::balance))
        .route("/history", get(handlers::history))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::jwt_auth_middleware,
        ));

    Router::new()
        .nest("/api/v1", public_routes)
        .nest("/api/v1/private", private_routes)
        .with_state(state)
}

/// Assemble state (with log recovery), bind, register, serve.
pub async fn build_state(config: &AppConfig) -> Result<Arc<CoordinatorState>> {
    let wal_path = Path::new(&config.coordinator.wal_path);
    let (registry, orphans) = recover(wal_path).context("Failed to replay decision log")?;
    let log = Arc::new(DecisionLog::open(wal_path).context("Failed to open decision log")?);

    // Orphans become durable aborts before we serve anything.
    for orphan in &orphans {
        log.append(&LogRecord::Decision {
            txid: orphan.txid,
            committed: false,
            reason: Some("coordinator_restart".to_string()),
            ts_ms: chrono::Utc::now().timestamp_millis(),
        })
        .context("Failed to record orphan abort")?;
    }

    let twopc_config = TwoPcConfig {
        prepare_timeout: config.timeout_2pc(),
        backoff_initial: Duration::from_millis(100),
        backoff_cap: Duration::from_millis(config.coordinator.commit_backoff_cap_ms),
        apply_grace: Duration::from_millis(config.coordinator.apply_grace_ms),
        ..TwoPcConfig::default()
    };
    let engine = TwoPhaseCoordinator::new(registry, log, twopc_config);

    let directory = BankDirectory::new(
        ServiceRegistry::new(&config.registry.path),
        Duration::from_millis(config.coordinator.rpc_timeout_ms),
    );
    let tokens = TokenService::new(
        config.coordinator.jwt_secret.clone(),
        config.coordinator.token_ttl_secs,
    );

    let state = CoordinatorState::new(tokens, directory, engine);

    // Best-effort abort sweep for orphans, off the startup path.
    for orphan in orphans {
        let state = state.clone();
        tokio::spawn(async move {
            let src = state.directory.resolve(&orphan.src_bank);
            let dst = state.directory.resolve(&orphan.dst_bank);
            match (src, dst) {
                (Ok(src), Ok(dst)) => {
                    state.engine.abort_orphan(orphan.txid, src, dst).await;
                }
                _ => warn!(
                    txid = %orphan.txid,
                    "Orphan sweep skipped: participant unresolved (hold expiry will clean up)"
                ),
            }
        });
    }

    Ok(state)
}

/// Run the coordinator daemon until shutdown.
pub async fn run_server(config: &AppConfig) -> Result<()> {
    let state = build_state(config).await?;

    let bind_addr = format!("{}:{}", config.coordinator.host, config.coordinator.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    let local_addr = listener.local_addr().context("No local address")?;

    let registry = ServiceRegistry::new(&config.registry.path);
    registry
        .register(COORDINATOR, &local_addr.to_string())
        .context("Failed to register with the service registry")?;

    info!(addr = %local_addr, "Coordinator listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    registry
        .deregister(COORDINATOR)
        .context("Failed to deregister from the service registry")?;

    info!("Coordinator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
