//! Wire DTOs for the coordinator and bank HTTP surfaces.
//!
//! Messages carry plain fields only; `txid` travels as 32 hex chars (16
//! bytes). The same structs are used by the axum handlers (server side) and
//! the reqwest callers (coordinator→bank and client→coordinator), so a field
//! change here is a protocol change.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::core_types::{Amount, TransactionRecord, TxId};

// ============================================================================
// Coordinator surface (client → coordinator)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "alpha")]
    pub bank: String,
    #[schema(example = "alice")]
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    /// Bearer token for subsequent calls
    pub token: String,
    /// Token validity in seconds
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferRequest {
    /// Client-allocated, stable across retries
    #[schema(value_type = String, example = "9f8b6a4c2d1e0f3a5b7c9d8e6f4a2b1c")]
    pub txid: TxId,
    pub src_bank: String,
    pub src_user: String,
    pub dst_bank: String,
    pub dst_user: String,
    /// Minor units, must be > 0
    pub amount: Amount,
}

/// Terminal outcome of a transfer as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferOutcome {
    Committed,
    Aborted { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResponse {
    pub txid: TxId,
    #[serde(flatten)]
    pub outcome: TransferOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub bank: String,
    pub username: String,
    pub balance: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub records: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PingResponse {
    /// Server timestamp in milliseconds
    #[schema(example = 1703494800000_u64)]
    pub timestamp_ms: u64,
}

// ============================================================================
// Bank participant surface (coordinator → bank)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub username: String,
    pub password: String,
}

/// Prepare a debit or credit hold.
///
/// Carries the counterparty identity so the bank can append the history
/// record at commit time; the commit message itself is txid-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub txid: TxId,
    pub username: String,
    pub amount: Amount,
    pub counterparty_bank: String,
    pub counterparty_user: String,
}

/// How a successful `Prepare*` was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepareDisposition {
    /// Fresh hold recorded
    Prepared,
    /// Idempotent replay: a live hold with this txid already exists
    DuplicatePrepared,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareAck {
    pub txid: TxId,
    pub disposition: PrepareDisposition,
}

/// Commit and abort are addressed by txid alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxidRequest {
    pub txid: TxId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub txid: TxId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_outcome_tagging() {
        let json = serde_json::to_value(&TransferOutcome::Committed).unwrap();
        assert_eq!(json["status"], "committed");

        let json = serde_json::to_value(&TransferOutcome::Aborted {
            reason: "insufficient_funds".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["reason"], "insufficient_funds");
    }

    #[test]
    fn test_transfer_response_flattens_outcome() {
        let resp = TransferResponse {
            txid: TxId::from_bytes([1; 16]),
            outcome: TransferOutcome::Committed,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "committed");
        assert!(json["txid"].is_string());

        let back: TransferResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back.outcome, TransferOutcome::Committed);
    }

    #[test]
    fn test_prepare_request_roundtrip() {
        let req = PrepareRequest {
            txid: TxId::generate(),
            username: "alice".into(),
            amount: 30,
            counterparty_bank: "beta".into(),
            counterparty_user: "bob".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: PrepareRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.txid, req.txid);
        assert_eq!(back.amount, 30);
    }
}
