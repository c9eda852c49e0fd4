//! Client-side coordinator API
//!
//! A trait seam so the queue worker is testable without a network, plus the
//! reqwest implementation that discovers the coordinator through the
//! service registry on every call (a restarted coordinator may come back on
//! a different address).

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::core_types::{Amount, TransactionRecord};
use crate::proto::{
    LoginRequest, LoginResponse, PingResponse, TransferOutcome, TransferRequest, TransferResponse,
};
use crate::registry::{COORDINATOR, ServiceRegistry};
use crate::response::{ApiResponse, error_codes};

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Transport failure or no coordinator registered. The request may or
    /// may not have been seen; retrying with the same txid is always safe.
    #[error("Coordinator unreachable: {0}")]
    Unreachable(String),

    /// Token missing, expired, or bound to a different subject
    #[error("Unauthorized")]
    Unauthorized,

    /// Same txid still executing; retry later with the same txid
    #[error("Transfer in flight")]
    InFlight,

    /// Any other coordinator-reported error
    #[error("{msg}")]
    Api { code: i32, msg: String },
}

#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    /// Availability probe; false means queue instead of submit.
    async fn ping(&self) -> bool;

    async fn login(
        &self,
        bank: &str,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ClientError>;

    async fn transfer(
        &self,
        token: &str,
        req: &TransferRequest,
    ) -> Result<TransferOutcome, ClientError>;

    async fn balance(&self, token: &str) -> Result<Amount, ClientError>;

    async fn history(&self, token: &str) -> Result<Vec<TransactionRecord>, ClientError>;
}

pub struct HttpCoordinator {
    registry: ServiceRegistry,
    http: reqwest::Client,
}

impl HttpCoordinator {
    pub fn new(registry: ServiceRegistry, request_timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self { registry, http }
    }

    fn base_url(&self) -> Result<String, ClientError> {
        let entry = self
            .registry
            .lookup(COORDINATOR)
            .map_err(|e| ClientError::Unreachable(format!("registry: {}", e)))?
            .ok_or_else(|| ClientError::Unreachable("coordinator not registered".into()))?;
        Ok(format!("http://{}", entry.addr))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &B,
    ) -> Result<T, ClientError> {
        let mut request = self
            .http
            .post(format!("{}{}", self.base_url()?, path))
            .json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let envelope = request
            .send()
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?
            .json::<ApiResponse<T>>()
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;
        unwrap_envelope(envelope)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> Result<T, ClientError> {
        let mut request = self.http.get(format!("{}{}", self.base_url()?, path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let envelope = request
            .send()
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?
            .json::<ApiResponse<T>>()
            .await
            .map_err(|e| ClientError::Unreachable(e.to_string()))?;
        unwrap_envelope(envelope)
    }
}

fn unwrap_envelope<T>(envelope: ApiResponse<T>) -> Result<T, ClientError> {
    match envelope.code {
        0 => envelope.data.ok_or(ClientError::Api {
            code: error_codes::INTERNAL_ERROR,
            msg: "empty success reply".to_string(),
        }),
        code if code == error_codes::UNAUTHORIZED
            || code == error_codes::AUTH_FAILED
            || code == error_codes::MISSING_AUTH =>
        {
            Err(ClientError::Unauthorized)
        }
        code if code == error_codes::DUPLICATE_IN_FLIGHT => Err(ClientError::InFlight),
        code => Err(ClientError::Api {
            code,
            msg: envelope.msg,
        }),
    }
}

#[async_trait]
impl CoordinatorApi for HttpCoordinator {
    async fn ping(&self) -> bool {
        self.get::<PingResponse>("/api/v1/ping", None).await.is_ok()
    }

    async fn login(
        &self,
        bank: &str,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ClientError> {
        let req = LoginRequest {
            bank: bank.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        };
        self.post("/api/v1/login", None, &req).await
    }

    async fn transfer(
        &self,
        token: &str,
        req: &TransferRequest,
    ) -> Result<TransferOutcome, ClientError> {
        let resp: TransferResponse = self
            .post("/api/v1/private/transfer", Some(token), req)
            .await?;
        Ok(resp.outcome)
    }

    async fn balance(&self, token: &str) -> Result<Amount, ClientError> {
        let resp: crate::proto::BalanceResponse =
            self.get("/api/v1/private/balance", Some(token)).await?;
        Ok(resp.balance)
    }

    async fn history(&self, token: &str) -> Result<Vec<TransactionRecord>, ClientError> {
        let resp: crate::proto::HistoryResponse =
            self.get("/api/v1/private/history", Some(token)).await?;
        Ok(resp.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_envelope_maps_auth_codes() {
        let envelope = ApiResponse::<u32>::error(error_codes::UNAUTHORIZED, "expired");
        assert!(matches!(
            unwrap_envelope::<()>(ApiResponse {
                code: envelope.code,
                msg: envelope.msg,
                data: None
            }),
            Err(ClientError::Unauthorized)
        ));
    }

    #[test]
    fn test_unwrap_envelope_maps_in_flight() {
        assert!(matches!(
            unwrap_envelope::<()>(ApiResponse {
                code: error_codes::DUPLICATE_IN_FLIGHT,
                msg: "in flight".into(),
                data: None
            }),
            Err(ClientError::InFlight)
        ));
    }

    #[test]
    fn test_unwrap_envelope_success() {
        let envelope = ApiResponse {
            code: 0,
            msg: "ok".into(),
            data: Some(7u32),
        };
        assert_eq!(unwrap_envelope(envelope).unwrap(), 7);
    }
}
