//! Client
//!
//! Session handling, direct submission while the coordinator is reachable,
//! and the offline queue + poll worker for when it is not. Transaction
//! identity is allocated here, once per user action, before the first wire
//! attempt, so a transfer survives any number of retries as one logical
//! operation.

pub mod api;
pub mod queue;
pub mod session;

use std::sync::Arc;

use tracing::info;

use crate::core_types::{Amount, Subject, TransactionRecord, TxId};
use crate::proto::{TransferOutcome, TransferRequest};

pub use api::{ClientError, CoordinatorApi, HttpCoordinator};
pub use queue::{OfflineQueue, QueueEvent, QueueWorker, QueueWorkerConfig, QueuedTransfer};
pub use session::Session;

/// How a user-initiated transfer left the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Coordinator answered with a terminal result
    Completed(TransferOutcome),
    /// Coordinator unreachable; queued with this txid for later drain
    Queued(TxId),
}

/// Facade tying the session, the API and the offline queue together.
/// The queue worker shares `queue` and `session` with this.
pub struct PayClient {
    api: Arc<dyn CoordinatorApi>,
    queue: Arc<OfflineQueue>,
    session: Arc<Session>,
}

impl PayClient {
    pub fn new(
        api: Arc<dyn CoordinatorApi>,
        queue: Arc<OfflineQueue>,
        session: Arc<Session>,
    ) -> Self {
        Self {
            api,
            queue,
            session,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Authenticate and store the session token.
    pub async fn login(
        &self,
        bank: &str,
        username: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let resp = self.api.login(bank, username, password).await?;
        self.session
            .authenticate(Subject::new(bank, username), resp.token);
        info!(bank = bank, user = username, "Logged in");
        Ok(())
    }

    /// Submit a transfer from the session subject.
    ///
    /// The txid is allocated here and survives every retry: if the
    /// coordinator is (or turns out to be) unreachable, the identical
    /// request is queued and the drain loop replays it verbatim.
    pub async fn submit_transfer(
        &self,
        dst_bank: &str,
        dst_user: &str,
        amount: Amount,
    ) -> Result<SubmitOutcome, ClientError> {
        let subject = self.session.subject().ok_or(ClientError::Unauthorized)?;
        let request = TransferRequest {
            txid: TxId::generate(),
            src_bank: subject.bank,
            src_user: subject.username,
            dst_bank: dst_bank.to_string(),
            dst_user: dst_user.to_string(),
            amount,
        };

        if !self.session.is_online() {
            let txid = request.txid;
            self.queue.push(request);
            info!(txid = %txid, "Coordinator offline, transfer queued");
            return Ok(SubmitOutcome::Queued(txid));
        }

        let token = self.session.token().ok_or(ClientError::Unauthorized)?;
        match self.api.transfer(&token, &request).await {
            Ok(outcome) => Ok(SubmitOutcome::Completed(outcome)),
            Err(ClientError::Unreachable(e)) => {
                // Went down mid-call. Whether the coordinator saw the
                // request or not, replaying the same txid is safe.
                let txid = request.txid;
                self.queue.push(request);
                self.session.set_online(false);
                info!(txid = %txid, error = %e, "Submit failed, transfer queued");
                Ok(SubmitOutcome::Queued(txid))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn balance(&self) -> Result<Amount, ClientError> {
        let token = self.session.token().ok_or(ClientError::Unauthorized)?;
        self.api.balance(&token).await
    }

    pub async fn history(&self) -> Result<Vec<TransactionRecord>, ClientError> {
        let token = self.session.token().ok_or(ClientError::Unauthorized)?;
        self.api.history(&token).await
    }
}
