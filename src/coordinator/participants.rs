//! HTTP participants
//!
//! [`HttpBank`] speaks the bank participant protocol over reqwest and maps
//! envelope codes onto engine outcomes. [`BankDirectory`] resolves bank
//! names through the service registry and caches one client per bank,
//! rebuilding it when the published address changes (a restarted bank comes
//! back on a new ephemeral port).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::core_types::{Amount, Subject, TransactionRecord, TxId};
use crate::proto::{
    AckResponse, AuthenticateRequest, BalanceResponse, HistoryResponse, PrepareAck,
    PrepareRequest, TxidRequest,
};
use crate::registry::{ServiceRegistry, bank_service};
use crate::response::{ApiResponse, error_codes};

use super::error::CoordinatorError;
use super::twopc::{AckOutcome, Participant, PrepareOutcome};

/// Short reason names for the envelope codes a prepare can fail with.
fn code_name(code: i32) -> &'static str {
    match code {
        error_codes::INSUFFICIENT_FUNDS => "insufficient_funds",
        error_codes::CONFLICTING_HOLD => "conflicting_hold",
        error_codes::DUPLICATE_TXID => "duplicate_txid",
        error_codes::UNKNOWN_USER => "unknown_user",
        error_codes::UNKNOWN_TXID => "unknown_txid",
        error_codes::NOT_PREPARED => "not_prepared",
        error_codes::INVALID_PARAMETER => "invalid_parameter",
        _ => "internal",
    }
}

/// One bank endpoint as the coordinator sees it.
pub struct HttpBank {
    bank: String,
    base_url: String,
    http: reqwest::Client,
}

impl HttpBank {
    pub fn new(bank: impl Into<String>, addr: &str, http: reqwest::Client) -> Self {
        Self {
            bank: bank.into(),
            base_url: format!("http://{}", addr),
            http,
        }
    }

    pub fn addr(&self) -> &str {
        self.base_url.trim_start_matches("http://")
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, reqwest::Error> {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?
            .json::<ApiResponse<T>>()
            .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, reqwest::Error> {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?
            .json::<ApiResponse<T>>()
            .await
    }

    async fn prepare(&self, path: &str, req: &PrepareRequest) -> PrepareOutcome {
        match self.post::<_, PrepareAck>(path, req).await {
            Ok(envelope) if envelope.code == 0 => PrepareOutcome::Prepared,
            Ok(envelope) => {
                debug!(
                    bank = %self.bank,
                    txid = %req.txid,
                    code = envelope.code,
                    msg = %envelope.msg,
                    "Prepare rejected"
                );
                PrepareOutcome::Rejected(code_name(envelope.code).to_string())
            }
            Err(e) => {
                warn!(bank = %self.bank, txid = %req.txid, error = %e, "Prepare transport failure");
                PrepareOutcome::Unavailable
            }
        }
    }

    async fn decide(&self, path: &str, txid: TxId) -> AckOutcome {
        match self
            .post::<_, AckResponse>(path, &TxidRequest { txid })
            .await
        {
            Ok(envelope) if envelope.code == 0 => AckOutcome::Ok,
            Ok(envelope)
                if envelope.code == error_codes::NOT_PREPARED
                    || envelope.code == error_codes::UNKNOWN_TXID =>
            {
                AckOutcome::Fatal(code_name(envelope.code).to_string())
            }
            Ok(envelope) => AckOutcome::Retry(format!("{}: {}", envelope.code, envelope.msg)),
            Err(e) => AckOutcome::Retry(e.to_string()),
        }
    }

    // ---- user-facing pass-through (login / balance / history) ----

    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(), CoordinatorError> {
        let req = AuthenticateRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        match self.post::<_, ()>("/api/v1/authenticate", &req).await {
            Ok(envelope) if envelope.code == 0 => Ok(()),
            Ok(_) => Err(CoordinatorError::AuthFailed),
            Err(e) => Err(CoordinatorError::BankUnavailable(e.to_string())),
        }
    }

    pub async fn balance(&self, username: &str) -> Result<Amount, CoordinatorError> {
        match self
            .get::<BalanceResponse>(&format!("/api/v1/balance/{}", username))
            .await
        {
            Ok(envelope) if envelope.code == 0 => envelope
                .data
                .map(|b| b.balance)
                .ok_or_else(|| CoordinatorError::Internal("empty balance reply".into())),
            Ok(envelope) => Err(CoordinatorError::Internal(envelope.msg)),
            Err(e) => Err(CoordinatorError::BankUnavailable(e.to_string())),
        }
    }

    pub async fn history(
        &self,
        username: &str,
    ) -> Result<Vec<TransactionRecord>, CoordinatorError> {
        match self
            .get::<HistoryResponse>(&format!("/api/v1/history/{}", username))
            .await
        {
            Ok(envelope) if envelope.code == 0 => envelope
                .data
                .map(|h| h.records)
                .ok_or_else(|| CoordinatorError::Internal("empty history reply".into())),
            Ok(envelope) => Err(CoordinatorError::Internal(envelope.msg)),
            Err(e) => Err(CoordinatorError::BankUnavailable(e.to_string())),
        }
    }
}

#[async_trait]
impl Participant for HttpBank {
    fn bank(&self) -> &str {
        &self.bank
    }

    async fn prepare_debit(
        &self,
        txid: TxId,
        username: &str,
        amount: Amount,
        counterparty: &Subject,
    ) -> PrepareOutcome {
        let req = PrepareRequest {
            txid,
            username: username.to_string(),
            amount,
            counterparty_bank: counterparty.bank.clone(),
            counterparty_user: counterparty.username.clone(),
        };
        self.prepare("/api/v1/tx/prepare/debit", &req).await
    }

    async fn prepare_credit(
        &self,
        txid: TxId,
        username: &str,
        amount: Amount,
        counterparty: &Subject,
    ) -> PrepareOutcome {
        let req = PrepareRequest {
            txid,
            username: username.to_string(),
            amount,
            counterparty_bank: counterparty.bank.clone(),
            counterparty_user: counterparty.username.clone(),
        };
        self.prepare("/api/v1/tx/prepare/credit", &req).await
    }

    async fn commit_debit(&self, txid: TxId) -> AckOutcome {
        self.decide("/api/v1/tx/commit/debit", txid).await
    }

    async fn commit_credit(&self, txid: TxId) -> AckOutcome {
        self.decide("/api/v1/tx/commit/credit", txid).await
    }

    async fn abort_debit(&self, txid: TxId) -> AckOutcome {
        self.decide("/api/v1/tx/abort/debit", txid).await
    }

    async fn abort_credit(&self, txid: TxId) -> AckOutcome {
        self.decide("/api/v1/tx/abort/credit", txid).await
    }
}

/// Name → participant resolution over the service registry.
pub struct BankDirectory {
    registry: ServiceRegistry,
    http: reqwest::Client,
    cache: DashMap<String, Arc<HttpBank>>,
}

impl BankDirectory {
    pub fn new(registry: ServiceRegistry, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            registry,
            http,
            cache: DashMap::new(),
        }
    }

    /// Resolve a bank name to its participant client.
    ///
    /// A registry read failure is `unavailable` (retryable, never cached in
    /// the idempotency registry); a missing entry is `unknown_bank`.
    pub fn resolve(&self, bank: &str) -> Result<Arc<HttpBank>, CoordinatorError> {
        let entry = self
            .registry
            .lookup(&bank_service(bank))
            .map_err(|e| CoordinatorError::BankUnavailable(format!("registry: {}", e)))?
            .ok_or_else(|| CoordinatorError::UnknownBank(bank.to_string()))?;

        if let Some(cached) = self.cache.get(bank)
            && cached.addr() == entry.addr
        {
            return Ok(Arc::clone(cached.value()));
        }

        let client = Arc::new(HttpBank::new(bank, &entry.addr, self.http.clone()));
        self.cache.insert(bank.to_string(), client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_name_mapping() {
        assert_eq!(
            code_name(error_codes::INSUFFICIENT_FUNDS),
            "insufficient_funds"
        );
        assert_eq!(code_name(error_codes::CONFLICTING_HOLD), "conflicting_hold");
        assert_eq!(code_name(9999), "internal");
    }

    #[test]
    fn test_resolve_unknown_bank() {
        let path = format!(
            "target/test_directory_{}.json",
            std::process::id()
        );
        let _ = std::fs::remove_file(&path);
        let dir = BankDirectory::new(ServiceRegistry::new(&path), Duration::from_secs(1));

        match dir.resolve("ghost") {
            Err(CoordinatorError::UnknownBank(name)) => assert_eq!(name, "ghost"),
            other => panic!("expected UnknownBank, got {:?}", other.map(|_| ())),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_resolve_caches_until_addr_changes() {
        let path = format!(
            "target/test_directory_cache_{}.json",
            std::process::id()
        );
        let _ = std::fs::remove_file(&path);
        let registry = ServiceRegistry::new(&path);
        registry
            .register(&bank_service("alpha"), "127.0.0.1:1000")
            .unwrap();

        let dir = BankDirectory::new(ServiceRegistry::new(&path), Duration::from_secs(1));
        let first = dir.resolve("alpha").unwrap();
        let second = dir.resolve("alpha").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        registry
            .register(&bank_service("alpha"), "127.0.0.1:2000")
            .unwrap();
        let third = dir.resolve("alpha").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.addr(), "127.0.0.1:2000");

        let _ = std::fs::remove_file(&path);
    }
}
