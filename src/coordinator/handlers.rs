//! Coordinator HTTP handlers
//!
//! Public surface: ping and login. Private surface (bearer token): transfer,
//! balance, history. A token authorizes its own `(bank, username)` subject
//! only; a transfer from anyone else's account is refused before any bank
//! sees a message.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{Extension, Json, extract::State};
use tracing::info;

use crate::proto::{
    BalanceResponse, HistoryResponse, LoginRequest, LoginResponse, PingResponse, TransferRequest,
    TransferResponse,
};
use crate::response::{ApiError, ApiResult, ok};
use crate::token::Claims;

use super::error::CoordinatorError;
use super::state::CoordinatorState;

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let status = axum::http::StatusCode::from_u16(err.http_status())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        ApiError::new(status, err.code(), err.to_string())
    }
}

/// Availability probe. The client's offline queue polls this; it never
/// fails while the process is up.
#[utoipa::path(
    get,
    path = "/api/v1/ping",
    responses(
        (status = 200, description = "Coordinator reachable", body = PingResponse, content_type = "application/json")
    ),
    tag = "System"
)]
pub async fn ping() -> ApiResult<PingResponse> {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    ok(PingResponse { timestamp_ms })
}

/// Authenticate against the user's bank and issue a bearer token.
#[utoipa::path(
    post,
    path = "/api/v1/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse, content_type = "application/json"),
        (status = 401, description = "Bad credentials"),
        (status = 404, description = "Unknown bank"),
        (status = 503, description = "Bank unavailable")
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<Arc<CoordinatorState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let bank = match state.directory.resolve(&req.bank) {
        Ok(bank) => bank,
        Err(e) => return ApiError::from(e).into_err(),
    };

    if let Err(e) = bank.authenticate(&req.username, &req.password).await {
        return ApiError::from(e).into_err();
    }

    let subject = crate::core_types::Subject::new(req.bank.clone(), req.username.clone());
    let token = match state.tokens.mint(&subject) {
        Ok(token) => token,
        Err(e) => return ApiError::internal(e.to_string()).into_err(),
    };

    info!(subject = %subject, "Login succeeded, token issued");
    ok(LoginResponse {
        token,
        expires_in_secs: state.tokens.ttl_secs(),
    })
}

/// Run one transfer through the two-phase engine (or answer from the
/// idempotency registry).
pub async fn transfer(
    State(state): State<Arc<CoordinatorState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TransferRequest>,
) -> ApiResult<TransferResponse> {
    if req.amount == 0 {
        return ApiError::from(CoordinatorError::InvalidAmount).into_err();
    }

    // The token subject must own the source account.
    if req.src_bank != claims.bank || req.src_user != claims.sub {
        return ApiError::from(CoordinatorError::Unauthorized).into_err();
    }

    // Resolve both participants first: a failed lookup is `unavailable`
    // and leaves no registry entry, so the client may retry freshly.
    let src = match state.directory.resolve(&req.src_bank) {
        Ok(bank) => bank,
        Err(e) => return ApiError::from(e).into_err(),
    };
    let dst = match state.directory.resolve(&req.dst_bank) {
        Ok(bank) => bank,
        Err(e) => return ApiError::from(e).into_err(),
    };

    match state.engine.transfer(&req, src, dst).await {
        Ok(outcome) => ok(TransferResponse {
            txid: req.txid,
            outcome,
        }),
        Err(e) => ApiError::from(e).into_err(),
    }
}

/// Balance of the token subject, read through its bank.
pub async fn balance(
    State(state): State<Arc<CoordinatorState>>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<BalanceResponse> {
    let bank = match state.directory.resolve(&claims.bank) {
        Ok(bank) => bank,
        Err(e) => return ApiError::from(e).into_err(),
    };

    match bank.balance(&claims.sub).await {
        Ok(balance) => ok(BalanceResponse {
            bank: claims.bank.clone(),
            username: claims.sub.clone(),
            balance,
        }),
        Err(e) => ApiError::from(e).into_err(),
    }
}

/// Transaction history of the token subject.
pub async fn history(
    State(state): State<Arc<CoordinatorState>>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<HistoryResponse> {
    let bank = match state.directory.resolve(&claims.bank) {
        Ok(bank) => bank,
        Err(e) => return ApiError::from(e).into_err(),
    };

    match bank.history(&claims.sub).await {
        Ok(records) => ok(HistoryResponse { records }),
        Err(e) => ApiError::from(e).into_err(),
    }
}
