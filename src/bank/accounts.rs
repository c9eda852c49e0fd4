//! Account book: balances, holds, and commit application
//!
//! This is the single source of truth for a bank's money. All mutations go
//! through a per-account lock; cross-account operations never nest locks,
//! so there is no ordering to get wrong.
//!
//! # Invariants (enforced here)
//!
//! 1. At most one live debit hold per account; credit holds may coexist.
//! 2. `balance ≥ Σ live debit holds` on every account at all times.
//! 3. A commit applies exactly once per (txid, side); replays answer `ok`
//!    from the completed set without touching the balance.
//! 4. Abort never alters a balance, and aborting an unknown txid is a no-op.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core_types::{Amount, Direction, TransactionRecord, TxId};
use crate::proto::{PrepareDisposition, PrepareRequest};

use super::error::BankError;
use super::store::{BankSnapshot, CompletedTx, PersistedUser};

/// Which side of a transfer a hold reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldKind {
    Debit,
    Credit,
}

impl HoldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldKind::Debit => "debit",
            HoldKind::Credit => "credit",
        }
    }
}

/// A tentative reservation (debit) or obligation (credit) tied to one txid.
/// Destroyed by commit, abort, or deadline expiry. Never persisted.
#[derive(Debug, Clone)]
struct Hold {
    txid: TxId,
    kind: HoldKind,
    amount: Amount,
    deadline: Instant,
    counterparty_bank: String,
    counterparty_user: String,
}

impl Hold {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline > now
    }
}

#[derive(Debug)]
struct Account {
    password_hash: String,
    balance: Amount,
    history: Vec<TransactionRecord>,
    holds: Vec<Hold>,
}

impl Account {
    /// Balance minus live debit reservations: what a new debit may draw on.
    fn available(&self, now: Instant) -> Amount {
        let reserved: Amount = self
            .holds
            .iter()
            .filter(|h| h.kind == HoldKind::Debit && h.is_live(now))
            .map(|h| h.amount)
            .sum();
        self.balance.saturating_sub(reserved)
    }

    fn find_hold(&self, txid: TxId, kind: HoldKind) -> Option<usize> {
        self.holds
            .iter()
            .position(|h| h.txid == txid && h.kind == kind)
    }
}

/// Hash a password into a PHC string (argon2id).
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow::anyhow!("Hashing failed: {}", e))
}

/// Verify a password against a PHC string.
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// The in-memory account table of one bank.
pub struct AccountBook {
    accounts: DashMap<String, Arc<Mutex<Account>>>,
    /// Live hold index: (txid, side) → account name. Commit and abort are
    /// addressed by txid only, so this is how they find the account.
    hold_index: DashMap<(TxId, HoldKind), String>,
    /// Applied commits; consulted before anything else so replays are safe.
    completed: DashMap<(TxId, HoldKind), ()>,
    hold_ttl: Duration,
}

impl AccountBook {
    pub fn new(hold_ttl: Duration) -> Self {
        Self {
            accounts: DashMap::new(),
            hold_index: DashMap::new(),
            completed: DashMap::new(),
            hold_ttl,
        }
    }

    /// Build the book from a loaded snapshot. Holds are not restored:
    /// a restart is an implicit abort of all in-flight txids.
    pub fn from_snapshot(snapshot: BankSnapshot, hold_ttl: Duration) -> Self {
        let book = Self::new(hold_ttl);
        for (name, user) in snapshot.users {
            book.accounts.insert(
                name,
                Arc::new(Mutex::new(Account {
                    password_hash: user.password_hash,
                    balance: user.balance,
                    history: user.history,
                    holds: Vec::new(),
                })),
            );
        }
        for done in snapshot.completed_txids {
            book.completed.insert((done.txid, done.kind), ());
        }
        book
    }

    /// Snapshot for the state file. Pending holds are skipped by design.
    pub fn to_snapshot(&self) -> BankSnapshot {
        let mut users = BTreeMap::new();
        for entry in self.accounts.iter() {
            let account = entry.value().lock().unwrap();
            users.insert(
                entry.key().clone(),
                PersistedUser {
                    password_hash: account.password_hash.clone(),
                    balance: account.balance,
                    history: account.history.clone(),
                },
            );
        }
        let mut completed_txids: Vec<CompletedTx> = self
            .completed
            .iter()
            .map(|e| CompletedTx {
                txid: e.key().0,
                kind: e.key().1,
            })
            .collect();
        completed_txids.sort_by_key(|c| (c.txid, c.kind.as_str()));
        BankSnapshot {
            users,
            completed_txids,
        }
    }

    fn account(&self, username: &str) -> Result<Arc<Mutex<Account>>, BankError> {
        self.accounts
            .get(username)
            .map(|e| e.value().clone())
            .ok_or_else(|| BankError::UnknownUser(username.to_string()))
    }

    /// Verify a user's credentials.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<(), BankError> {
        let account = self.account(username)?;
        let account = account.lock().unwrap();
        if verify_password(password, &account.password_hash) {
            Ok(())
        } else {
            Err(BankError::BadPassword)
        }
    }

    /// Record a hold for one side of a transfer.
    ///
    /// Retries with the same txid are idempotent and answer
    /// `DuplicatePrepared`. Debits additionally enforce the one-live-debit
    /// rule and the funds check against `balance - Σ live debit holds`.
    pub fn prepare(
        &self,
        kind: HoldKind,
        req: &PrepareRequest,
    ) -> Result<PrepareDisposition, BankError> {
        if req.amount == 0 {
            return Err(BankError::InvalidAmount);
        }
        if self.completed.contains_key(&(req.txid, kind)) {
            return Err(BankError::DuplicateTxid { state: "committed" });
        }

        let account = self.account(&req.username)?;
        let mut account = account.lock().unwrap();
        let now = Instant::now();

        if let Some(idx) = account.find_hold(req.txid, kind) {
            if account.holds[idx].is_live(now) {
                debug!(txid = %req.txid, user = %req.username, "Duplicate prepare (idempotent)");
                return Ok(PrepareDisposition::DuplicatePrepared);
            }
            // Expired leftover the sweeper has not collected yet: the
            // original reservation is gone, so start over.
            account.holds.remove(idx);
            self.hold_index.remove(&(req.txid, kind));
        }

        if kind == HoldKind::Debit {
            let conflicting = account
                .holds
                .iter()
                .any(|h| h.kind == HoldKind::Debit && h.txid != req.txid && h.is_live(now));
            if conflicting {
                return Err(BankError::ConflictingHold);
            }
            if account.available(now) < req.amount {
                return Err(BankError::InsufficientFunds);
            }
        }

        account.holds.push(Hold {
            txid: req.txid,
            kind,
            amount: req.amount,
            deadline: now + self.hold_ttl,
            counterparty_bank: req.counterparty_bank.clone(),
            counterparty_user: req.counterparty_user.clone(),
        });
        self.hold_index
            .insert((req.txid, kind), req.username.clone());

        debug!(
            txid = %req.txid,
            user = %req.username,
            kind = kind.as_str(),
            amount = req.amount,
            "Hold recorded"
        );
        Ok(PrepareDisposition::Prepared)
    }

    /// Apply one side of a decided transfer: move the money, append the
    /// history record, release the hold.
    pub fn commit(&self, kind: HoldKind, txid: TxId) -> Result<(), BankError> {
        if self.completed.contains_key(&(txid, kind)) {
            debug!(txid = %txid, kind = kind.as_str(), "Commit replay (already applied)");
            return Ok(());
        }

        let username = self
            .hold_index
            .get(&(txid, kind))
            .map(|e| e.value().clone())
            .ok_or(BankError::UnknownTxid)?;

        let account = self.account(&username)?;
        let mut account = account.lock().unwrap();

        let idx = account.find_hold(txid, kind).ok_or(BankError::UnknownTxid)?;
        if !account.holds[idx].is_live(Instant::now()) {
            // The reservation lapsed before the decision arrived. Refusing
            // here is what keeps an expired debit equivalent to an abort.
            let hold = account.holds.remove(idx);
            self.hold_index.remove(&(txid, kind));
            warn!(
                txid = %txid,
                user = %username,
                kind = kind.as_str(),
                amount = hold.amount,
                "Commit refused: hold expired"
            );
            return Err(BankError::NotPrepared);
        }

        // Validate the delta before touching anything, so a refusal leaves
        // the hold and balance exactly as they were.
        let amount = account.holds[idx].amount;
        let (new_balance, direction) = match kind {
            HoldKind::Debit => (
                account
                    .balance
                    .checked_sub(amount)
                    .ok_or_else(|| BankError::Internal("debit below zero".to_string()))?,
                Direction::Sent,
            ),
            HoldKind::Credit => (
                account
                    .balance
                    .checked_add(amount)
                    .ok_or(BankError::Overflow)?,
                Direction::Received,
            ),
        };

        let hold = account.holds.remove(idx);
        self.hold_index.remove(&(txid, kind));
        account.balance = new_balance;
        account.history.push(TransactionRecord::new(
            txid,
            hold.counterparty_bank.clone(),
            hold.counterparty_user.clone(),
            direction,
            hold.amount,
        ));
        self.completed.insert((txid, kind), ());

        info!(
            txid = %txid,
            user = %username,
            kind = kind.as_str(),
            amount = hold.amount,
            balance = account.balance,
            "Commit applied"
        );
        Ok(())
    }

    /// Release a hold. Unknown or already-released txids are a no-op:
    /// abort must be safe to deliver any number of times.
    pub fn abort(&self, kind: HoldKind, txid: TxId) {
        let Some((_, username)) = self.hold_index.remove(&(txid, kind)) else {
            return;
        };
        if let Ok(account) = self.account(&username) {
            let mut account = account.lock().unwrap();
            if let Some(idx) = account.find_hold(txid, kind) {
                let hold = account.holds.remove(idx);
                info!(
                    txid = %txid,
                    user = %username,
                    kind = kind.as_str(),
                    amount = hold.amount,
                    "Hold aborted"
                );
            }
        }
    }

    /// At-rest balance (holds are reservations, not deductions).
    pub fn balance(&self, username: &str) -> Result<Amount, BankError> {
        let account = self.account(username)?;
        let account = account.lock().unwrap();
        Ok(account.balance)
    }

    pub fn history(&self, username: &str) -> Result<Vec<TransactionRecord>, BankError> {
        let account = self.account(username)?;
        let account = account.lock().unwrap();
        Ok(account.history.clone())
    }

    /// Drop every hold past its deadline. An expired debit is an implicit
    /// abort: the balance is untouched. Returns how many were removed.
    pub fn expire_holds(&self) -> usize {
        let now = Instant::now();
        let mut expired = 0;
        for entry in self.accounts.iter() {
            let mut account = entry.value().lock().unwrap();
            let before = account.holds.len();
            account.holds.retain(|h| {
                if h.is_live(now) {
                    true
                } else {
                    self.hold_index.remove(&(h.txid, h.kind));
                    warn!(
                        txid = %h.txid,
                        user = %entry.key(),
                        kind = h.kind.as_str(),
                        amount = h.amount,
                        "Hold expired (implicit abort)"
                    );
                    false
                }
            });
            expired += before - account.holds.len();
        }
        expired
    }

    /// Number of live holds (expired-but-unswept excluded).
    pub fn live_hold_count(&self) -> usize {
        let now = Instant::now();
        self.accounts
            .iter()
            .map(|e| {
                e.value()
                    .lock()
                    .unwrap()
                    .holds
                    .iter()
                    .filter(|h| h.is_live(now))
                    .count()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    fn book_with(users: &[(&str, Amount)]) -> AccountBook {
        let book = AccountBook::new(TTL);
        for (name, balance) in users {
            book.accounts.insert(
                name.to_string(),
                Arc::new(Mutex::new(Account {
                    password_hash: hash_password("pw").unwrap(),
                    balance: *balance,
                    history: Vec::new(),
                    holds: Vec::new(),
                })),
            );
        }
        book
    }

    fn prepare_req(txid: TxId, user: &str, amount: Amount) -> PrepareRequest {
        PrepareRequest {
            txid,
            username: user.to_string(),
            amount,
            counterparty_bank: "other".to_string(),
            counterparty_user: "peer".to_string(),
        }
    }

    #[test]
    fn test_authenticate() {
        let book = book_with(&[("alice", 100)]);
        assert!(book.authenticate("alice", "pw").is_ok());
        assert_eq!(
            book.authenticate("alice", "nope"),
            Err(BankError::BadPassword)
        );
        assert!(matches!(
            book.authenticate("ghost", "pw"),
            Err(BankError::UnknownUser(_))
        ));
    }

    #[test]
    fn test_prepare_commit_debit() {
        let book = book_with(&[("alice", 100)]);
        let txid = TxId::generate();

        let disp = book
            .prepare(HoldKind::Debit, &prepare_req(txid, "alice", 30))
            .unwrap();
        assert_eq!(disp, PrepareDisposition::Prepared);
        // Hold reserves but does not deduct
        assert_eq!(book.balance("alice").unwrap(), 100);

        book.commit(HoldKind::Debit, txid).unwrap();
        assert_eq!(book.balance("alice").unwrap(), 70);

        let history = book.history("alice").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].txid, txid);
        assert_eq!(history[0].direction, Direction::Sent);
        assert_eq!(history[0].amount, 30);
    }

    #[test]
    fn test_commit_is_idempotent() {
        let book = book_with(&[("alice", 100)]);
        let txid = TxId::generate();

        book.prepare(HoldKind::Debit, &prepare_req(txid, "alice", 30))
            .unwrap();
        book.commit(HoldKind::Debit, txid).unwrap();
        // Any number of replays: same state as a single commit
        book.commit(HoldKind::Debit, txid).unwrap();
        book.commit(HoldKind::Debit, txid).unwrap();

        assert_eq!(book.balance("alice").unwrap(), 70);
        assert_eq!(book.history("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let book = book_with(&[("alice", 100)]);
        let txid = TxId::generate();
        let req = prepare_req(txid, "alice", 30);

        assert_eq!(
            book.prepare(HoldKind::Debit, &req).unwrap(),
            PrepareDisposition::Prepared
        );
        assert_eq!(
            book.prepare(HoldKind::Debit, &req).unwrap(),
            PrepareDisposition::DuplicatePrepared
        );
        // Still a single reservation: 100 - 30 leaves room for 70, not 40
        assert_eq!(book.live_hold_count(), 1);
    }

    #[test]
    fn test_second_debit_hold_conflicts() {
        let book = book_with(&[("alice", 100)]);

        book.prepare(HoldKind::Debit, &prepare_req(TxId::generate(), "alice", 80))
            .unwrap();

        // One live debit hold per account; funds are not even consulted
        assert_eq!(
            book.prepare(HoldKind::Debit, &prepare_req(TxId::generate(), "alice", 10)),
            Err(BankError::ConflictingHold)
        );
    }

    #[test]
    fn test_insufficient_funds() {
        let book = book_with(&[("alice", 10)]);
        assert_eq!(
            book.prepare(HoldKind::Debit, &prepare_req(TxId::generate(), "alice", 50)),
            Err(BankError::InsufficientFunds)
        );
        assert_eq!(book.live_hold_count(), 0);
    }

    #[test]
    fn test_credit_holds_coexist() {
        let book = book_with(&[("bob", 0)]);

        book.prepare(HoldKind::Credit, &prepare_req(TxId::generate(), "bob", 10))
            .unwrap();
        book.prepare(HoldKind::Credit, &prepare_req(TxId::generate(), "bob", 20))
            .unwrap();
        assert_eq!(book.live_hold_count(), 2);
    }

    #[test]
    fn test_abort_restores_pre_prepare_state() {
        let book = book_with(&[("alice", 100)]);
        let txid = TxId::generate();

        book.prepare(HoldKind::Debit, &prepare_req(txid, "alice", 30))
            .unwrap();
        book.abort(HoldKind::Debit, txid);
        book.abort(HoldKind::Debit, txid); // replay: no-op

        assert_eq!(book.balance("alice").unwrap(), 100);
        assert_eq!(book.live_hold_count(), 0);
        assert!(book.history("alice").unwrap().is_empty());

        // Released funds are reservable again
        book.prepare(HoldKind::Debit, &prepare_req(TxId::generate(), "alice", 100))
            .unwrap();
    }

    #[test]
    fn test_abort_unknown_txid_is_noop() {
        let book = book_with(&[("alice", 100)]);
        book.abort(HoldKind::Debit, TxId::generate());
        assert_eq!(book.balance("alice").unwrap(), 100);
    }

    #[test]
    fn test_commit_unknown_txid() {
        let book = book_with(&[("alice", 100)]);
        assert_eq!(
            book.commit(HoldKind::Debit, TxId::generate()),
            Err(BankError::UnknownTxid)
        );
    }

    #[test]
    fn test_commit_after_abort_fails() {
        let book = book_with(&[("alice", 100)]);
        let txid = TxId::generate();

        book.prepare(HoldKind::Debit, &prepare_req(txid, "alice", 30))
            .unwrap();
        book.abort(HoldKind::Debit, txid);

        assert_eq!(
            book.commit(HoldKind::Debit, txid),
            Err(BankError::UnknownTxid)
        );
        assert_eq!(book.balance("alice").unwrap(), 100);
    }

    #[test]
    fn test_expired_hold_refuses_commit() {
        let book = AccountBook::new(Duration::from_millis(0));
        book.accounts.insert(
            "alice".to_string(),
            Arc::new(Mutex::new(Account {
                password_hash: "x".to_string(),
                balance: 100,
                history: Vec::new(),
                holds: Vec::new(),
            })),
        );
        let txid = TxId::generate();
        book.prepare(HoldKind::Debit, &prepare_req(txid, "alice", 30))
            .unwrap();

        // Zero TTL: the hold is already past deadline
        assert_eq!(
            book.commit(HoldKind::Debit, txid),
            Err(BankError::NotPrepared)
        );
        assert_eq!(book.balance("alice").unwrap(), 100);
    }

    #[test]
    fn test_sweep_removes_expired_holds_only() {
        let book = AccountBook::new(Duration::from_millis(0));
        book.accounts.insert(
            "alice".to_string(),
            Arc::new(Mutex::new(Account {
                password_hash: "x".to_string(),
                balance: 100,
                history: Vec::new(),
                holds: Vec::new(),
            })),
        );
        book.prepare(HoldKind::Debit, &prepare_req(TxId::generate(), "alice", 30))
            .unwrap();

        assert_eq!(book.expire_holds(), 1);
        assert_eq!(book.expire_holds(), 0);
        assert_eq!(book.balance("alice").unwrap(), 100);
    }

    #[test]
    fn test_prepare_after_commit_reports_duplicate() {
        let book = book_with(&[("alice", 100)]);
        let txid = TxId::generate();
        let req = prepare_req(txid, "alice", 30);

        book.prepare(HoldKind::Debit, &req).unwrap();
        book.commit(HoldKind::Debit, txid).unwrap();

        assert_eq!(
            book.prepare(HoldKind::Debit, &req),
            Err(BankError::DuplicateTxid { state: "committed" })
        );
    }

    #[test]
    fn test_intra_bank_sides_are_independent() {
        let book = book_with(&[("alice", 100), ("bob", 0)]);
        let txid = TxId::generate();

        book.prepare(HoldKind::Debit, &prepare_req(txid, "alice", 25))
            .unwrap();
        book.prepare(HoldKind::Credit, &prepare_req(txid, "bob", 25))
            .unwrap();

        book.commit(HoldKind::Debit, txid).unwrap();
        book.commit(HoldKind::Credit, txid).unwrap();

        assert_eq!(book.balance("alice").unwrap(), 75);
        assert_eq!(book.balance("bob").unwrap(), 25);

        // Conservation across the book
        assert_eq!(
            book.balance("alice").unwrap() + book.balance("bob").unwrap(),
            100
        );
    }

    #[test]
    fn test_snapshot_roundtrip_keeps_completed_set() {
        let book = book_with(&[("alice", 100)]);
        let txid = TxId::generate();

        book.prepare(HoldKind::Debit, &prepare_req(txid, "alice", 30))
            .unwrap();
        book.commit(HoldKind::Debit, txid).unwrap();

        let restored = AccountBook::from_snapshot(book.to_snapshot(), TTL);
        assert_eq!(restored.balance("alice").unwrap(), 70);
        // Replayed commit after restart: idempotent ok
        restored.commit(HoldKind::Debit, txid).unwrap();
        assert_eq!(restored.balance("alice").unwrap(), 70);
        // Holds were not persisted
        assert_eq!(restored.live_hold_count(), 0);
    }
}
