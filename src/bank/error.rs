//! Bank participant error types
//!
//! Domain errors returned synchronously by the participant protocol.
//! Idempotent duplicates are not errors (see `PrepareDisposition`); what
//! lands here is a genuine refusal.

use thiserror::Error;

use crate::response::error_codes;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Bad password")]
    BadPassword,

    #[error("Insufficient funds")]
    InsufficientFunds,

    /// Prepare for a txid this bank already finished (committed). The
    /// coordinator treats this as a prepare rejection and correlates via
    /// the reported state.
    #[error("Duplicate txid (already {state})")]
    DuplicateTxid { state: &'static str },

    /// Another in-flight debit hold exists on the same account.
    #[error("Conflicting hold on account")]
    ConflictingHold,

    #[error("Unknown txid")]
    UnknownTxid,

    /// The hold exists but is past its deadline, or was never prepared.
    #[error("Transaction not prepared")]
    NotPrepared,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Balance overflow")]
    Overflow,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BankError {
    /// Stable numeric code for the API envelope
    pub fn code(&self) -> i32 {
        match self {
            BankError::UnknownUser(_) => error_codes::UNKNOWN_USER,
            BankError::BadPassword => error_codes::AUTH_FAILED,
            BankError::InsufficientFunds => error_codes::INSUFFICIENT_FUNDS,
            BankError::DuplicateTxid { .. } => error_codes::DUPLICATE_TXID,
            BankError::ConflictingHold => error_codes::CONFLICTING_HOLD,
            BankError::UnknownTxid => error_codes::UNKNOWN_TXID,
            BankError::NotPrepared => error_codes::NOT_PREPARED,
            BankError::InvalidAmount => error_codes::INVALID_PARAMETER,
            BankError::Overflow => error_codes::INVALID_PARAMETER,
            BankError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// HTTP status for the API envelope
    pub fn http_status(&self) -> u16 {
        match self {
            BankError::UnknownUser(_) | BankError::UnknownTxid => 404,
            BankError::BadPassword => 401,
            BankError::InsufficientFunds
            | BankError::DuplicateTxid { .. }
            | BankError::ConflictingHold
            | BankError::NotPrepared => 422,
            BankError::InvalidAmount | BankError::Overflow => 400,
            BankError::Internal(_) => 500,
        }
    }
}
