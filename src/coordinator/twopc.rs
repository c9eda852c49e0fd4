//! Two-phase commit engine
//!
//! Drives one transfer across two participants (possibly the same bank):
//! parallel prepare under a single wall-clock deadline, a durable decision,
//! then commit/abort delivery that retries until every prepared side has
//! acknowledged.
//!
//! # Safety invariants
//!
//! 1. **Decide-before-deliver**: the decision record is synced to the log
//!    and visible in the registry before any `Commit*`/`Abort*` leaves.
//! 2. **Every prepared side converges**: commit and abort deliveries retry
//!    with capped exponential backoff; transport failures are never
//!    surfaced as transfer failures once the decision is durable.
//! 3. **No abort for non-prepared sides**: a reject/timeout/unavailable
//!    reply reserved nothing, and a late prepare is cleaned up by the
//!    bank's hold expiry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::core_types::{Amount, Subject, TxId};
use crate::proto::{TransferOutcome, TransferRequest};

use super::error::CoordinatorError;
use super::idempotency::{BeginOutcome, TxRegistry, TxState};
use super::wal::{DecisionLog, LogRecord};

// ============================================================================
// Participant capability
// ============================================================================

/// Outcome of one prepare RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// Hold recorded (or idempotently re-acknowledged)
    Prepared,
    /// Bank refused; nothing was reserved
    Rejected(String),
    /// No reply within the prepare deadline
    TimedOut,
    /// Transport or discovery failure
    Unavailable,
}

impl PrepareOutcome {
    /// Short reason string as surfaced in `aborted(prepare_failed: ...)`.
    fn reason(&self) -> &str {
        match self {
            PrepareOutcome::Prepared => "prepared",
            PrepareOutcome::Rejected(reason) => reason,
            PrepareOutcome::TimedOut => "timeout",
            PrepareOutcome::Unavailable => "unavailable",
        }
    }
}

/// Outcome of one commit/abort RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Acknowledged (including idempotent replays)
    Ok,
    /// Transport failure; deliver again
    Retry(String),
    /// The bank can never apply this (e.g. hold expired before commit).
    /// Retrying is pointless; this is the operational-alarm corner.
    Fatal(String),
}

/// The coordinator's view of one side of a transfer: the six decision
/// messages of the participant protocol. Source and destination are two
/// instances of this capability, possibly the same endpoint.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Bank name, for logs and the durable Begin record
    fn bank(&self) -> &str;

    async fn prepare_debit(&self, txid: TxId, username: &str, amount: Amount, counterparty: &Subject) -> PrepareOutcome;
    async fn prepare_credit(&self, txid: TxId, username: &str, amount: Amount, counterparty: &Subject) -> PrepareOutcome;
    async fn commit_debit(&self, txid: TxId) -> AckOutcome;
    async fn commit_credit(&self, txid: TxId) -> AckOutcome;
    async fn abort_debit(&self, txid: TxId) -> AckOutcome;
    async fn abort_credit(&self, txid: TxId) -> AckOutcome;
}

/// One decision message, dispatched by [`deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecisionOp {
    CommitDebit,
    CommitCredit,
    AbortDebit,
    AbortCredit,
}

impl DecisionOp {
    fn as_str(&self) -> &'static str {
        match self {
            DecisionOp::CommitDebit => "commit_debit",
            DecisionOp::CommitCredit => "commit_credit",
            DecisionOp::AbortDebit => "abort_debit",
            DecisionOp::AbortCredit => "abort_credit",
        }
    }

    async fn send(&self, participant: &dyn Participant, txid: TxId) -> AckOutcome {
        match self {
            DecisionOp::CommitDebit => participant.commit_debit(txid).await,
            DecisionOp::CommitCredit => participant.commit_credit(txid).await,
            DecisionOp::AbortDebit => participant.abort_debit(txid).await,
            DecisionOp::AbortCredit => participant.abort_credit(txid).await,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone)]
pub struct TwoPcConfig {
    /// Single deadline for the whole prepare phase (TIMEOUT2PC)
    pub prepare_timeout: Duration,
    /// First retry delay for decision delivery
    pub backoff_initial: Duration,
    /// Retry delay cap
    pub backoff_cap: Duration,
    /// How long the Transfer reply waits on delivery before it continues
    /// detached
    pub apply_grace: Duration,
    /// Attempts for the best-effort abort sweep after a restart
    pub sweep_attempts: u32,
}

impl Default for TwoPcConfig {
    fn default() -> Self {
        Self {
            prepare_timeout: Duration::from_secs(5),
            backoff_initial: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(30),
            apply_grace: Duration::from_secs(2),
            sweep_attempts: 3,
        }
    }
}

pub struct TwoPhaseCoordinator {
    registry: Arc<TxRegistry>,
    log: Arc<DecisionLog>,
    config: TwoPcConfig,
}

impl TwoPhaseCoordinator {
    pub fn new(registry: Arc<TxRegistry>, log: Arc<DecisionLog>, config: TwoPcConfig) -> Self {
        Self {
            registry,
            log,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<TxRegistry> {
        &self.registry
    }

    /// Execute (or answer from the registry) one transfer.
    ///
    /// Participants are already resolved by the caller; a failed lookup
    /// never reaches this point and therefore never leaves an entry.
    pub async fn transfer(
        &self,
        req: &TransferRequest,
        src: Arc<dyn Participant>,
        dst: Arc<dyn Participant>,
    ) -> Result<TransferOutcome, CoordinatorError> {
        let src_subject = Subject::new(req.src_bank.clone(), req.src_user.clone());
        let dst_subject = Subject::new(req.dst_bank.clone(), req.dst_user.clone());

        match self.registry.begin(
            req.txid,
            src_subject.clone(),
            dst_subject.clone(),
            req.amount,
        ) {
            BeginOutcome::Terminal(TxState::Committed) => {
                info!(txid = %req.txid, "Duplicate transfer: returning cached commit");
                return Ok(TransferOutcome::Committed);
            }
            BeginOutcome::Terminal(TxState::Aborted { reason }) => {
                info!(txid = %req.txid, reason = %reason, "Duplicate transfer: returning cached abort");
                return Ok(TransferOutcome::Aborted { reason });
            }
            BeginOutcome::Terminal(TxState::InFlight) | BeginOutcome::InFlight => {
                return Err(CoordinatorError::DuplicateInFlight);
            }
            BeginOutcome::Fresh => {}
        }

        if let Err(e) = self.log.append(&LogRecord::Begin {
            txid: req.txid,
            src_bank: req.src_bank.clone(),
            src_user: req.src_user.clone(),
            dst_bank: req.dst_bank.clone(),
            dst_user: req.dst_user.clone(),
            amount: req.amount,
            ts_ms: chrono::Utc::now().timestamp_millis(),
        }) {
            // Nothing was sent anywhere; drop the claim so a retry can
            // start fresh.
            self.registry.forget(req.txid);
            return Err(CoordinatorError::Internal(format!(
                "decision log append failed: {}",
                e
            )));
        }

        // ---- Prepare phase: both sides in parallel, one deadline ----
        let deadline = self.config.prepare_timeout;
        let (src_prep, dst_prep) = tokio::join!(
            timeout(
                deadline,
                src.prepare_debit(req.txid, &req.src_user, req.amount, &dst_subject)
            ),
            timeout(
                deadline,
                dst.prepare_credit(req.txid, &req.dst_user, req.amount, &src_subject)
            ),
        );
        let src_prep = src_prep.unwrap_or(PrepareOutcome::TimedOut);
        let dst_prep = dst_prep.unwrap_or(PrepareOutcome::TimedOut);

        debug!(
            txid = %req.txid,
            src = %src.bank(),
            dst = %dst.bank(),
            src_prepare = ?src_prep,
            dst_prepare = ?dst_prep,
            "Prepare phase complete"
        );

        // ---- Decision ----
        if src_prep == PrepareOutcome::Prepared && dst_prep == PrepareOutcome::Prepared {
            self.finalize(req.txid, TxState::Committed, None)?;
            info!(txid = %req.txid, amount = req.amount, "Transfer committed");

            self.deliver_all(
                req.txid,
                vec![
                    (src, DecisionOp::CommitDebit),
                    (dst, DecisionOp::CommitCredit),
                ],
                None,
            )
            .await;
            Ok(TransferOutcome::Committed)
        } else {
            let failed = if src_prep != PrepareOutcome::Prepared {
                &src_prep
            } else {
                &dst_prep
            };
            let reason = format!("prepare_failed: {}", failed.reason());
            self.finalize(
                req.txid,
                TxState::Aborted {
                    reason: reason.clone(),
                },
                Some(reason.as_str()),
            )?;
            warn!(txid = %req.txid, reason = %reason, "Transfer aborted");

            // Compensating aborts go only to sides that actually prepared.
            let mut sides = Vec::new();
            if src_prep == PrepareOutcome::Prepared {
                sides.push((src, DecisionOp::AbortDebit));
            }
            if dst_prep == PrepareOutcome::Prepared {
                sides.push((dst, DecisionOp::AbortCredit));
            }
            self.deliver_all(req.txid, sides, None).await;
            Ok(TransferOutcome::Aborted { reason })
        }
    }

    /// Make the decision durable, then visible. Order matters: log first,
    /// registry second, reply (by the caller) last.
    fn finalize(
        &self,
        txid: TxId,
        state: TxState,
        reason: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        self.log
            .append(&LogRecord::Decision {
                txid,
                committed: matches!(state, TxState::Committed),
                reason: reason.map(str::to_string),
                ts_ms: chrono::Utc::now().timestamp_millis(),
            })
            .map_err(|e| {
                CoordinatorError::Internal(format!("decision log append failed: {}", e))
            })?;
        self.registry.complete(txid, state);
        Ok(())
    }

    /// Best-effort abort of a txid recovered as orphaned (Begin without
    /// Decision in the log). Bounded attempts; hold expiry at the banks is
    /// the backstop.
    pub async fn abort_orphan(
        &self,
        txid: TxId,
        src: Arc<dyn Participant>,
        dst: Arc<dyn Participant>,
    ) {
        warn!(txid = %txid, "Sweeping orphaned transfer: sending aborts");
        self.deliver_all(
            txid,
            vec![
                (src, DecisionOp::AbortDebit),
                (dst, DecisionOp::AbortCredit),
            ],
            Some(self.config.sweep_attempts),
        )
        .await;
    }

    /// Deliver decision messages concurrently. Waits up to `apply_grace`;
    /// deliveries still in flight after that keep retrying detached.
    async fn deliver_all(
        &self,
        txid: TxId,
        sides: Vec<(Arc<dyn Participant>, DecisionOp)>,
        attempt_budget: Option<u32>,
    ) {
        let mut handles = Vec::with_capacity(sides.len());
        for (participant, op) in sides {
            let backoff_initial = self.config.backoff_initial;
            let backoff_cap = self.config.backoff_cap;
            handles.push(tokio::spawn(deliver(
                participant,
                op,
                txid,
                backoff_initial,
                backoff_cap,
                attempt_budget,
            )));
        }

        let deadline = tokio::time::Instant::now() + self.config.apply_grace;
        for handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if timeout(remaining, handle).await.is_err() {
                debug!(txid = %txid, "Decision delivery continues in background");
            }
        }
    }
}

/// Retry one decision message until acknowledged (or the attempt budget is
/// spent). Returns whether the side acknowledged.
async fn deliver(
    participant: Arc<dyn Participant>,
    op: DecisionOp,
    txid: TxId,
    backoff_initial: Duration,
    backoff_cap: Duration,
    attempt_budget: Option<u32>,
) -> bool {
    let mut delay = backoff_initial;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op.send(participant.as_ref(), txid).await {
            AckOutcome::Ok => {
                debug!(txid = %txid, bank = %participant.bank(), op = op.as_str(), attempt, "Decision acknowledged");
                return true;
            }
            AckOutcome::Fatal(reason) => {
                // Operational alarm: a prepared hold vanished before the
                // decision landed. The durable decision stands; the money
                // on this side did not move.
                error!(
                    txid = %txid,
                    bank = %participant.bank(),
                    op = op.as_str(),
                    reason = %reason,
                    "Decision delivery permanently refused"
                );
                return false;
            }
            AckOutcome::Retry(reason) => {
                if let Some(budget) = attempt_budget
                    && attempt >= budget
                {
                    warn!(
                        txid = %txid,
                        bank = %participant.bank(),
                        op = op.as_str(),
                        attempts = attempt,
                        "Giving up decision delivery (attempt budget spent)"
                    );
                    return false;
                }
                warn!(
                    txid = %txid,
                    bank = %participant.bank(),
                    op = op.as_str(),
                    attempt,
                    reason = %reason,
                    "Decision delivery failed, will retry"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(backoff_cap);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scriptable participant for engine tests.
    struct MockParticipant {
        bank: &'static str,
        prepare_debit_outcome: Mutex<PrepareOutcome>,
        prepare_credit_outcome: Mutex<PrepareOutcome>,
        /// Commit failures before success, per op name
        transient_failures: Mutex<HashMap<&'static str, u32>>,
        prepare_debit_calls: AtomicUsize,
        prepare_credit_calls: AtomicUsize,
        commit_debit_calls: AtomicUsize,
        commit_credit_calls: AtomicUsize,
        abort_debit_calls: AtomicUsize,
        abort_credit_calls: AtomicUsize,
    }

    impl MockParticipant {
        fn new(bank: &'static str) -> Arc<Self> {
            Arc::new(Self {
                bank,
                prepare_debit_outcome: Mutex::new(PrepareOutcome::Prepared),
                prepare_credit_outcome: Mutex::new(PrepareOutcome::Prepared),
                transient_failures: Mutex::new(HashMap::new()),
                prepare_debit_calls: AtomicUsize::new(0),
                prepare_credit_calls: AtomicUsize::new(0),
                commit_debit_calls: AtomicUsize::new(0),
                commit_credit_calls: AtomicUsize::new(0),
                abort_debit_calls: AtomicUsize::new(0),
                abort_credit_calls: AtomicUsize::new(0),
            })
        }

        fn set_prepare_debit(&self, outcome: PrepareOutcome) {
            *self.prepare_debit_outcome.lock().unwrap() = outcome;
        }

        fn set_prepare_credit(&self, outcome: PrepareOutcome) {
            *self.prepare_credit_outcome.lock().unwrap() = outcome;
        }

        fn fail_transiently(&self, op: &'static str, times: u32) {
            self.transient_failures.lock().unwrap().insert(op, times);
        }

        fn ack(&self, op: &'static str) -> AckOutcome {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(op)
                && *left > 0
            {
                *left -= 1;
                return AckOutcome::Retry("connection refused".into());
            }
            AckOutcome::Ok
        }
    }

    #[async_trait]
    impl Participant for MockParticipant {
        fn bank(&self) -> &str {
            self.bank
        }

        async fn prepare_debit(
            &self,
            _txid: TxId,
            _username: &str,
            _amount: Amount,
            _counterparty: &Subject,
        ) -> PrepareOutcome {
            self.prepare_debit_calls.fetch_add(1, Ordering::SeqCst);
            self.prepare_debit_outcome.lock().unwrap().clone()
        }

        async fn prepare_credit(
            &self,
            _txid: TxId,
            _username: &str,
            _amount: Amount,
            _counterparty: &Subject,
        ) -> PrepareOutcome {
            self.prepare_credit_calls.fetch_add(1, Ordering::SeqCst);
            self.prepare_credit_outcome.lock().unwrap().clone()
        }

        async fn commit_debit(&self, _txid: TxId) -> AckOutcome {
            self.commit_debit_calls.fetch_add(1, Ordering::SeqCst);
            self.ack("commit_debit")
        }

        async fn commit_credit(&self, _txid: TxId) -> AckOutcome {
            self.commit_credit_calls.fetch_add(1, Ordering::SeqCst);
            self.ack("commit_credit")
        }

        async fn abort_debit(&self, _txid: TxId) -> AckOutcome {
            self.abort_debit_calls.fetch_add(1, Ordering::SeqCst);
            self.ack("abort_debit")
        }

        async fn abort_credit(&self, _txid: TxId) -> AckOutcome {
            self.abort_credit_calls.fetch_add(1, Ordering::SeqCst);
            self.ack("abort_credit")
        }
    }

    struct Harness {
        engine: TwoPhaseCoordinator,
        src: Arc<MockParticipant>,
        dst: Arc<MockParticipant>,
        log_path: std::path::PathBuf,
    }

    impl Harness {
        fn new(tag: &str) -> Self {
            let log_path = std::path::PathBuf::from(format!(
                "target/test_twopc_{}_{}.jsonl",
                tag,
                std::process::id()
            ));
            let _ = std::fs::remove_file(&log_path);

            let config = TwoPcConfig {
                prepare_timeout: Duration::from_millis(200),
                backoff_initial: Duration::from_millis(5),
                backoff_cap: Duration::from_millis(20),
                apply_grace: Duration::from_secs(2),
                sweep_attempts: 2,
            };
            Self {
                engine: TwoPhaseCoordinator::new(
                    Arc::new(TxRegistry::new()),
                    Arc::new(DecisionLog::open(&log_path).unwrap()),
                    config,
                ),
                src: MockParticipant::new("alpha"),
                dst: MockParticipant::new("beta"),
                log_path,
            }
        }

        fn request(&self, txid: TxId) -> TransferRequest {
            TransferRequest {
                txid,
                src_bank: "alpha".into(),
                src_user: "alice".into(),
                dst_bank: "beta".into(),
                dst_user: "bob".into(),
                amount: 30,
            }
        }

        async fn run(&self, txid: TxId) -> TransferOutcome {
            self.engine
                .transfer(&self.request(txid), self.src.clone(), self.dst.clone())
                .await
                .unwrap()
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.log_path);
        }
    }

    #[tokio::test]
    async fn test_both_prepared_commits() {
        let h = Harness::new("commit");
        let txid = TxId::generate();

        assert_eq!(h.run(txid).await, TransferOutcome::Committed);
        assert_eq!(h.src.commit_debit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.dst.commit_credit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.src.abort_debit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejection_aborts_prepared_side_only() {
        let h = Harness::new("reject");
        h.dst
            .set_prepare_credit(PrepareOutcome::Rejected("unknown_user".into()));
        let txid = TxId::generate();

        match h.run(txid).await {
            TransferOutcome::Aborted { reason } => {
                assert_eq!(reason, "prepare_failed: unknown_user")
            }
            other => panic!("expected abort, got {:?}", other),
        }

        // Source prepared, so it gets the compensating abort; the
        // rejecting side reserved nothing and gets none.
        assert_eq!(h.src.abort_debit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.dst.abort_credit_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.src.commit_debit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unavailable_side_aborts() {
        let h = Harness::new("unavailable");
        h.src.set_prepare_debit(PrepareOutcome::Unavailable);
        let txid = TxId::generate();

        match h.run(txid).await {
            TransferOutcome::Aborted { reason } => {
                assert_eq!(reason, "prepare_failed: unavailable")
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(h.dst.abort_credit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_returns_cached_outcome_without_side_effects() {
        let h = Harness::new("duplicate");
        let txid = TxId::generate();

        assert_eq!(h.run(txid).await, TransferOutcome::Committed);
        assert_eq!(h.run(txid).await, TransferOutcome::Committed);
        assert_eq!(h.run(txid).await, TransferOutcome::Committed);

        // One prepare and one commit per side, ever
        assert_eq!(h.src.prepare_debit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.src.commit_debit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.dst.prepare_credit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.dst.commit_credit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_abort_reason_is_cached() {
        let h = Harness::new("dup_abort");
        h.dst
            .set_prepare_credit(PrepareOutcome::Rejected("insufficient_funds".into()));
        let txid = TxId::generate();

        let first = h.run(txid).await;
        // Fix the bank; the cached outcome must still win
        h.dst.set_prepare_credit(PrepareOutcome::Prepared);
        let second = h.run(txid).await;

        assert_eq!(first, second);
        assert_eq!(h.dst.prepare_credit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commit_delivery_retries_transient_failures() {
        let h = Harness::new("retry");
        h.dst.fail_transiently("commit_credit", 3);
        let txid = TxId::generate();

        assert_eq!(h.run(txid).await, TransferOutcome::Committed);
        // 3 failures + 1 success
        assert_eq!(h.dst.commit_credit_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_decision_is_logged_before_delivery() {
        let h = Harness::new("durable");
        let txid = TxId::generate();
        h.run(txid).await;

        let mut decisions = 0;
        DecisionLog::replay(&h.log_path, |r| {
            if let LogRecord::Decision { committed, .. } = r {
                assert!(committed);
                decisions += 1;
            }
        })
        .unwrap();
        assert_eq!(decisions, 1);
    }

    #[tokio::test]
    async fn test_abort_orphan_is_bounded() {
        let h = Harness::new("orphan");
        // Abort keeps failing; the sweep must give up after its budget
        h.src.fail_transiently("abort_debit", 100);
        let txid = TxId::generate();

        h.engine
            .abort_orphan(txid, h.src.clone(), h.dst.clone())
            .await;

        assert_eq!(h.src.abort_debit_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.dst.abort_credit_calls.load(Ordering::SeqCst), 1);
    }
}
