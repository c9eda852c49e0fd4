//! Idempotency registry
//!
//! The coordinator's txid → outcome map. A txid observed in a terminal
//! state is never re-executed: resubmissions answer with the stored result
//! and cause no side effects. The insert is atomic, so two concurrent
//! submissions of the same txid cannot both enter the prepare phase.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::core_types::{Amount, Subject, TxId};

/// Lifecycle of one coordinated transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TxState {
    InFlight,
    Committed,
    Aborted { reason: String },
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxState::InFlight)
    }
}

#[derive(Debug, Clone)]
pub struct TxEntry {
    pub txid: TxId,
    pub state: TxState,
    pub src: Subject,
    pub dst: Subject,
    pub amount: Amount,
    pub started_at_ms: i64,
}

/// What a `Transfer` arrival finds in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// Inserted as in-flight; caller proceeds to 2PC
    Fresh,
    /// Same txid currently executing
    InFlight,
    /// Already decided; return the stored result verbatim
    Terminal(TxState),
}

#[derive(Default)]
pub struct TxRegistry {
    entries: DashMap<TxId, TxEntry>,
}

impl TxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim a txid for execution, or report what already
    /// happened to it.
    pub fn begin(&self, txid: TxId, src: Subject, dst: Subject, amount: Amount) -> BeginOutcome {
        match self.entries.entry(txid) {
            Entry::Occupied(entry) => match &entry.get().state {
                TxState::InFlight => BeginOutcome::InFlight,
                terminal => BeginOutcome::Terminal(terminal.clone()),
            },
            Entry::Vacant(slot) => {
                slot.insert(TxEntry {
                    txid,
                    state: TxState::InFlight,
                    src,
                    dst,
                    amount,
                    started_at_ms: chrono::Utc::now().timestamp_millis(),
                });
                BeginOutcome::Fresh
            }
        }
    }

    /// Transition an in-flight entry to its terminal state. The new state
    /// is visible to lookups before the RPC reply goes out.
    pub fn complete(&self, txid: TxId, state: TxState) {
        debug_assert!(state.is_terminal());
        if let Some(mut entry) = self.entries.get_mut(&txid) {
            entry.state = state;
        }
    }

    /// Drop an in-flight entry that never actually started (registry
    /// lookup failures are not cached).
    pub fn forget(&self, txid: TxId) {
        self.entries
            .remove_if(&txid, |_, entry| entry.state == TxState::InFlight);
    }

    /// Seed a terminal entry during log replay.
    pub fn restore(&self, entry: TxEntry) {
        self.entries.insert(entry.txid, entry);
    }

    pub fn get(&self, txid: TxId) -> Option<TxEntry> {
        self.entries.get(&txid).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subjects() -> (Subject, Subject) {
        (Subject::new("alpha", "alice"), Subject::new("beta", "bob"))
    }

    #[test]
    fn test_fresh_then_in_flight() {
        let reg = TxRegistry::new();
        let (src, dst) = subjects();
        let txid = TxId::generate();

        assert_eq!(
            reg.begin(txid, src.clone(), dst.clone(), 10),
            BeginOutcome::Fresh
        );
        assert_eq!(reg.begin(txid, src, dst, 10), BeginOutcome::InFlight);
    }

    #[test]
    fn test_terminal_result_is_returned_verbatim() {
        let reg = TxRegistry::new();
        let (src, dst) = subjects();
        let txid = TxId::generate();

        reg.begin(txid, src.clone(), dst.clone(), 10);
        reg.complete(
            txid,
            TxState::Aborted {
                reason: "insufficient_funds".into(),
            },
        );

        match reg.begin(txid, src, dst, 10) {
            BeginOutcome::Terminal(TxState::Aborted { reason }) => {
                assert_eq!(reason, "insufficient_funds")
            }
            other => panic!("expected terminal abort, got {:?}", other),
        }
    }

    #[test]
    fn test_forget_only_drops_in_flight() {
        let reg = TxRegistry::new();
        let (src, dst) = subjects();
        let txid = TxId::generate();

        reg.begin(txid, src.clone(), dst.clone(), 10);
        reg.complete(txid, TxState::Committed);
        reg.forget(txid);

        // Terminal entries survive forget
        assert_eq!(
            reg.begin(txid, src.clone(), dst.clone(), 10),
            BeginOutcome::Terminal(TxState::Committed)
        );

        let txid2 = TxId::generate();
        reg.begin(txid2, src.clone(), dst.clone(), 10);
        reg.forget(txid2);
        assert_eq!(reg.begin(txid2, src, dst, 10), BeginOutcome::Fresh);
    }
}
