//! Core type definitions shared by all three components.
//!
//! Everything on the wire and in persisted state is built from these:
//! [`TxId`] (the client-allocated transaction identifier), [`Amount`]
//! (integer minor units), [`Subject`] (the bank/username pair a token is
//! bound to) and [`TransactionRecord`] (an immutable history entry).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Monetary amount in minor units (cents). Never negative by construction.
pub type Amount = u64;

/// Transaction identifier: 16 random bytes, allocated once by the client
/// and reused verbatim across every retry of the same transfer.
///
/// Wire and log representation is lowercase hex (32 chars).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId([u8; 16]);

impl TxId {
    /// Allocate a fresh random txid (128-bit, collision probability
    /// negligible).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().into_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid txid: expected 32 hex chars")]
pub struct ParseTxIdError;

impl FromStr for TxId {
    type Err = ParseTxIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|_| ParseTxIdError)?;
        let bytes: [u8; 16] = raw.try_into().map_err(|_| ParseTxIdError)?;
        Ok(Self(bytes))
    }
}

impl Serialize for TxId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The identity a token authorizes: one user at one bank.
///
/// Every authenticated coordinator operation acts on exactly this pair;
/// a transfer whose source differs from the token subject is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub bank: String,
    pub username: String,
}

impl Subject {
    pub fn new(bank: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            bank: bank.into(),
            username: username.into(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bank, self.username)
    }
}

/// Direction of a committed transfer from the account owner's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

/// One entry in an account's append-only history. Written exactly once, by
/// the owning bank's commit handler, and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub txid: TxId,
    pub counterparty_bank: String,
    pub counterparty_user: String,
    pub direction: Direction,
    pub amount: Amount,
    /// Commit wall-clock time, unix millis.
    pub timestamp_ms: i64,
}

impl TransactionRecord {
    pub fn new(
        txid: TxId,
        counterparty_bank: impl Into<String>,
        counterparty_user: impl Into<String>,
        direction: Direction,
        amount: Amount,
    ) -> Self {
        Self {
            txid,
            counterparty_bank: counterparty_bank.into(),
            counterparty_user: counterparty_user.into(),
            direction,
            amount,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}
