//! Offline transfer queue
//!
//! When the coordinator is unreachable, user transfers are queued here with
//! their already-allocated txid and replayed later. The txid never changes
//! across retries, which is what makes the whole pipeline idempotent
//! end-to-end: however many times an entry is submitted, the system applies
//! it once and every submission reports the same terminal outcome.
//!
//! Draining is serialized (one in-flight transfer at a time) so the user
//! observes queue order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core_types::TxId;
use crate::proto::{TransferOutcome, TransferRequest};

use super::api::{ClientError, CoordinatorApi};
use super::session::Session;

#[derive(Debug, Clone)]
pub struct QueuedTransfer {
    pub request: TransferRequest,
    pub attempts: u32,
}

#[derive(Default)]
pub struct OfflineQueue {
    entries: Mutex<VecDeque<QueuedTransfer>>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the back; insertion order is drain order.
    pub fn push(&self, request: TransferRequest) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_back(QueuedTransfer {
            request,
            attempts: 0,
        });
    }

    /// Clone the head entry and count the attempt.
    fn take_front(&self) -> Option<TransferRequest> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.front_mut()?;
        entry.attempts += 1;
        Some(entry.request.clone())
    }

    fn pop_front(&self) {
        self.entries.lock().unwrap().pop_front();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Pending entries for display.
    pub fn pending(&self) -> Vec<QueuedTransfer> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }
}

/// What the drain loop reports back to the UI.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Terminal outcome reached (fresh or cached, the two are
    /// indistinguishable and equivalent)
    Completed {
        txid: TxId,
        outcome: TransferOutcome,
    },
    /// Coordinator rejected the request outright (e.g. unknown bank);
    /// the entry is dropped
    Rejected { txid: TxId, reason: String },
    /// Token expired mid-drain; entries stay queued with their txids until
    /// the user logs in again
    AuthExpired,
}

#[derive(Debug, Clone)]
pub struct QueueWorkerConfig {
    /// Ping cadence while watching for the coordinator (OFFLINE_POLL)
    pub poll_interval: Duration,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Background task: poll the coordinator, drain the queue while reachable.
pub struct QueueWorker {
    api: Arc<dyn CoordinatorApi>,
    queue: Arc<OfflineQueue>,
    session: Arc<Session>,
    events: mpsc::UnboundedSender<QueueEvent>,
    config: QueueWorkerConfig,
}

impl QueueWorker {
    pub fn new(
        api: Arc<dyn CoordinatorApi>,
        queue: Arc<OfflineQueue>,
        session: Arc<Session>,
        events: mpsc::UnboundedSender<QueueEvent>,
        config: QueueWorkerConfig,
    ) -> Self {
        Self {
            api,
            queue,
            session,
            events,
            config,
        }
    }

    /// Run the poll loop forever.
    pub async fn run(&self) -> ! {
        info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Starting offline-queue worker"
        );
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            self.tick().await;
        }
    }

    /// One poll cycle: probe, then drain while reachable. Public so tests
    /// can step the worker deterministically.
    pub async fn tick(&self) {
        if !self.api.ping().await {
            if self.session.is_online() {
                info!("Coordinator went offline, queuing transfers");
            }
            self.session.set_online(false);
            return;
        }
        self.session.set_online(true);
        self.drain().await;
    }

    async fn drain(&self) {
        loop {
            // A paused session keeps its entries; they resume after login.
            if self.session.reauth_needed() {
                return;
            }
            let Some(token) = self.session.token() else {
                return;
            };
            let Some(request) = self.queue.take_front() else {
                return;
            };

            let txid = request.txid;
            match self.api.transfer(&token, &request).await {
                Ok(outcome) => {
                    self.queue.pop_front();
                    info!(txid = %txid, outcome = ?outcome, "Queued transfer completed");
                    let _ = self.events.send(QueueEvent::Completed { txid, outcome });
                }
                Err(ClientError::Unreachable(e)) => {
                    debug!(txid = %txid, error = %e, "Drain interrupted, coordinator unreachable");
                    self.session.set_online(false);
                    return;
                }
                Err(ClientError::InFlight) => {
                    // Our own earlier submission is still executing; same
                    // txid again next poll.
                    debug!(txid = %txid, "Transfer still in flight, will re-poll");
                    return;
                }
                Err(ClientError::Unauthorized) => {
                    warn!("Token expired while draining; pausing queue");
                    self.session.flag_reauth();
                    let _ = self.events.send(QueueEvent::AuthExpired);
                    return;
                }
                Err(ClientError::Api { msg, .. }) => {
                    self.queue.pop_front();
                    warn!(txid = %txid, reason = %msg, "Queued transfer rejected");
                    let _ = self.events.send(QueueEvent::Rejected { txid, reason: msg });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::core_types::{Amount, Subject, TransactionRecord};
    use crate::proto::LoginResponse;

    struct MockApi {
        reachable: AtomicBool,
        /// Scripted per-txid results; missing = committed
        scripted: Mutex<HashMap<TxId, ClientError>>,
        submitted: Mutex<Vec<TxId>>,
    }

    impl MockApi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                reachable: AtomicBool::new(true),
                scripted: Mutex::new(HashMap::new()),
                submitted: Mutex::new(Vec::new()),
            })
        }

        fn set_reachable(&self, reachable: bool) {
            self.reachable.store(reachable, Ordering::SeqCst);
        }

        fn script(&self, txid: TxId, err: ClientError) {
            self.scripted.lock().unwrap().insert(txid, err);
        }

        fn clear_script(&self, txid: TxId) {
            self.scripted.lock().unwrap().remove(&txid);
        }

        fn submitted(&self) -> Vec<TxId> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CoordinatorApi for MockApi {
        async fn ping(&self) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }

        async fn login(
            &self,
            _bank: &str,
            _username: &str,
            _password: &str,
        ) -> Result<LoginResponse, ClientError> {
            Ok(LoginResponse {
                token: "tok".into(),
                expires_in_secs: 3600,
            })
        }

        async fn transfer(
            &self,
            _token: &str,
            req: &TransferRequest,
        ) -> Result<TransferOutcome, ClientError> {
            self.submitted.lock().unwrap().push(req.txid);
            match self.scripted.lock().unwrap().get(&req.txid) {
                Some(err) => Err(err.clone()),
                None => Ok(TransferOutcome::Committed),
            }
        }

        async fn balance(&self, _token: &str) -> Result<Amount, ClientError> {
            Ok(0)
        }

        async fn history(&self, _token: &str) -> Result<Vec<TransactionRecord>, ClientError> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        api: Arc<MockApi>,
        queue: Arc<OfflineQueue>,
        session: Arc<Session>,
        worker: QueueWorker,
        events: mpsc::UnboundedReceiver<QueueEvent>,
    }

    fn fixture() -> Fixture {
        let api = MockApi::new();
        let queue = Arc::new(OfflineQueue::new());
        let session = Arc::new(Session::new());
        session.authenticate(Subject::new("alpha", "alice"), "tok".into());
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = QueueWorker::new(
            api.clone(),
            queue.clone(),
            session.clone(),
            tx,
            QueueWorkerConfig::default(),
        );
        Fixture {
            api,
            queue,
            session,
            worker,
            events: rx,
        }
    }

    fn request(txid: TxId) -> TransferRequest {
        TransferRequest {
            txid,
            src_bank: "alpha".into(),
            src_user: "alice".into(),
            dst_bank: "beta".into(),
            dst_user: "bob".into(),
            amount: 10,
        }
    }

    #[tokio::test]
    async fn test_offline_queues_then_drains_in_order() {
        let mut f = fixture();
        let t1 = TxId::generate();
        let t2 = TxId::generate();
        f.queue.push(request(t1));
        f.queue.push(request(t2));

        f.api.set_reachable(false);
        f.worker.tick().await;
        assert_eq!(f.queue.len(), 2);
        assert!(!f.session.is_online());
        assert!(f.api.submitted().is_empty());

        f.api.set_reachable(true);
        f.worker.tick().await;
        assert!(f.queue.is_empty());
        assert!(f.session.is_online());
        assert_eq!(f.api.submitted(), vec![t1, t2]);

        match f.events.try_recv().unwrap() {
            QueueEvent::Completed { txid, outcome } => {
                assert_eq!(txid, t1);
                assert_eq!(outcome, TransferOutcome::Committed);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_txid_is_stable_across_retries() {
        let mut f = fixture();
        let txid = TxId::generate();
        f.queue.push(request(txid));
        f.api
            .script(txid, ClientError::Unreachable("connection reset".into()));

        f.worker.tick().await;
        assert_eq!(f.queue.len(), 1);

        f.api.clear_script(txid);
        f.worker.tick().await;
        assert!(f.queue.is_empty());

        // Same txid on every wire attempt
        assert_eq!(f.api.submitted(), vec![txid, txid]);
        assert!(matches!(
            f.events.try_recv().unwrap(),
            QueueEvent::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_pauses_and_keeps_entries() {
        let mut f = fixture();
        let t1 = TxId::generate();
        let t2 = TxId::generate();
        f.queue.push(request(t1));
        f.queue.push(request(t2));
        f.api.script(t1, ClientError::Unauthorized);

        f.worker.tick().await;
        // Both entries survive; drain is paused until re-login
        assert_eq!(f.queue.len(), 2);
        assert!(f.session.reauth_needed());
        assert!(matches!(
            f.events.try_recv().unwrap(),
            QueueEvent::AuthExpired
        ));

        // Re-login resumes with the original txid
        f.api.clear_script(t1);
        f.session
            .authenticate(Subject::new("alpha", "alice"), "tok2".into());
        f.worker.tick().await;
        assert!(f.queue.is_empty());
        assert_eq!(f.api.submitted(), vec![t1, t1, t2]);
    }

    #[tokio::test]
    async fn test_rejected_entry_is_dropped() {
        let mut f = fixture();
        let txid = TxId::generate();
        f.queue.push(request(txid));
        f.api.script(
            txid,
            ClientError::Api {
                code: 4002,
                msg: "Unknown bank: gamma".into(),
            },
        );

        f.worker.tick().await;
        assert!(f.queue.is_empty());
        assert!(matches!(
            f.events.try_recv().unwrap(),
            QueueEvent::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_in_flight_leaves_entry_for_next_poll() {
        let mut f = fixture();
        let txid = TxId::generate();
        f.queue.push(request(txid));
        f.api.script(txid, ClientError::InFlight);

        f.worker.tick().await;
        assert_eq!(f.queue.len(), 1);
        assert!(f.events.try_recv().is_err());
    }
}
