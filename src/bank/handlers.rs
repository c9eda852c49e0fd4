//! Bank participant HTTP handlers
//!
//! The participant protocol: authenticate, prepare/commit/abort for each
//! side, plus balance and history reads. Callers are the coordinator only;
//! tokens never reach a bank.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use crate::proto::{
    AckResponse, AuthenticateRequest, PingResponse, PrepareAck, PrepareRequest, TxidRequest,
};
use crate::response::{ApiError, ApiResult, ok};

use super::accounts::HoldKind;
use super::error::BankError;
use super::state::BankState;

impl From<BankError> for ApiError {
    fn from(err: BankError) -> Self {
        let status = axum::http::StatusCode::from_u16(err.http_status())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        ApiError::new(status, err.code(), err.to_string())
    }
}

/// Liveness probe; doubles as the registry health endpoint.
pub async fn ping() -> ApiResult<PingResponse> {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    ok(PingResponse { timestamp_ms })
}

/// Credential check on behalf of the coordinator's Login.
pub async fn authenticate(
    State(state): State<Arc<BankState>>,
    Json(req): Json<AuthenticateRequest>,
) -> ApiResult<()> {
    match state.book.authenticate(&req.username, &req.password) {
        Ok(()) => {
            info!(user = %req.username, "Authenticated");
            ok(())
        }
        Err(e) => ApiError::from(e).into_err(),
    }
}

pub async fn prepare_debit(
    State(state): State<Arc<BankState>>,
    Json(req): Json<PrepareRequest>,
) -> ApiResult<PrepareAck> {
    prepare(state, HoldKind::Debit, req)
}

pub async fn prepare_credit(
    State(state): State<Arc<BankState>>,
    Json(req): Json<PrepareRequest>,
) -> ApiResult<PrepareAck> {
    prepare(state, HoldKind::Credit, req)
}

fn prepare(state: Arc<BankState>, kind: HoldKind, req: PrepareRequest) -> ApiResult<PrepareAck> {
    match state.book.prepare(kind, &req) {
        Ok(disposition) => ok(PrepareAck {
            txid: req.txid,
            disposition,
        }),
        Err(e) => ApiError::from(e).into_err(),
    }
}

pub async fn commit_debit(
    State(state): State<Arc<BankState>>,
    Json(req): Json<TxidRequest>,
) -> ApiResult<AckResponse> {
    commit(state, HoldKind::Debit, req)
}

pub async fn commit_credit(
    State(state): State<Arc<BankState>>,
    Json(req): Json<TxidRequest>,
) -> ApiResult<AckResponse> {
    commit(state, HoldKind::Credit, req)
}

fn commit(state: Arc<BankState>, kind: HoldKind, req: TxidRequest) -> ApiResult<AckResponse> {
    match state.book.commit(kind, req.txid) {
        Ok(()) => ok(AckResponse { txid: req.txid }),
        Err(e) => ApiError::from(e).into_err(),
    }
}

pub async fn abort_debit(
    State(state): State<Arc<BankState>>,
    Json(req): Json<TxidRequest>,
) -> ApiResult<AckResponse> {
    state.book.abort(HoldKind::Debit, req.txid);
    ok(AckResponse { txid: req.txid })
}

pub async fn abort_credit(
    State(state): State<Arc<BankState>>,
    Json(req): Json<TxidRequest>,
) -> ApiResult<AckResponse> {
    state.book.abort(HoldKind::Credit, req.txid);
    ok(AckResponse { txid: req.txid })
}

pub async fn get_balance(
    State(state): State<Arc<BankState>>,
    Path(username): Path<String>,
) -> ApiResult<crate::proto::BalanceResponse> {
    match state.book.balance(&username) {
        Ok(balance) => ok(crate::proto::BalanceResponse {
            bank: state.name.clone(),
            username,
            balance,
        }),
        Err(e) => ApiError::from(e).into_err(),
    }
}

pub async fn get_history(
    State(state): State<Arc<BankState>>,
    Path(username): Path<String>,
) -> ApiResult<crate::proto::HistoryResponse> {
    match state.book.history(&username) {
        Ok(records) => ok(crate::proto::HistoryResponse { records }),
        Err(e) => ApiError::from(e).into_err(),
    }
}
