//! Bank durable state
//!
//! Two file formats live here:
//!
//! - the **state file**, written on graceful shutdown and loaded at startup:
//!   users (password hash, balance, history) plus the set of applied
//!   commits. Live holds are deliberately absent: a restart is an implicit
//!   abort of everything in flight.
//! - the **credential bootstrap file**, read once when no state file exists
//!   yet. Dev passwords in it are plaintext and get hashed at load.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core_types::{Amount, TransactionRecord, TxId};

use super::accounts::HoldKind;

/// One user as persisted in the state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedUser {
    pub password_hash: String,
    pub balance: Amount,
    pub history: Vec<TransactionRecord>,
}

/// A commit that was applied, keyed by txid and side so the two legs of an
/// intra-bank transfer stay independently idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTx {
    pub txid: TxId,
    pub kind: HoldKind,
}

/// Full bank state snapshot as serialized to disk.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BankSnapshot {
    pub users: BTreeMap<String, PersistedUser>,
    pub completed_txids: Vec<CompletedTx>,
}

/// Credential bootstrap file: `{ "users": [ {username, password, balance} ] }`
#[derive(Debug, Deserialize)]
pub struct CredentialsFile {
    pub users: Vec<CredentialEntry>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialEntry {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub balance: Amount,
}

/// File paths and load/save for one named bank.
pub struct BankStore {
    state_path: PathBuf,
    credentials_path: PathBuf,
}

impl BankStore {
    pub fn new(data_dir: &Path, credentials_dir: &Path, bank_name: &str) -> Self {
        Self {
            state_path: data_dir.join(format!("{}.state.json", bank_name)),
            credentials_path: credentials_dir.join(format!("{}.json", bank_name)),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Load the state file if present, otherwise bootstrap from the
    /// credential file. Fails when neither exists or either is corrupt;
    /// the daemon treats that as a fatal startup error.
    pub fn load(&self) -> Result<BankSnapshot> {
        match fs::read_to_string(&self.state_path) {
            Ok(content) => {
                let snapshot: BankSnapshot = serde_json::from_str(&content).with_context(|| {
                    format!("Corrupt state file: {}", self.state_path.display())
                })?;
                info!(
                    path = %self.state_path.display(),
                    users = snapshot.users.len(),
                    completed = snapshot.completed_txids.len(),
                    "Loaded bank state"
                );
                Ok(snapshot)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.bootstrap(),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to read state file: {}", self.state_path.display())
            }),
        }
    }

    /// First start: hash the plaintext dev passwords and build a fresh
    /// snapshot with empty histories.
    fn bootstrap(&self) -> Result<BankSnapshot> {
        let content = fs::read_to_string(&self.credentials_path).with_context(|| {
            format!(
                "No state file and no credentials file: {}",
                self.credentials_path.display()
            )
        })?;
        let creds: CredentialsFile = serde_json::from_str(&content).with_context(|| {
            format!(
                "Corrupt credentials file: {}",
                self.credentials_path.display()
            )
        })?;

        let mut users = BTreeMap::new();
        for entry in creds.users {
            let hash = super::accounts::hash_password(&entry.password)?;
            users.insert(
                entry.username,
                PersistedUser {
                    password_hash: hash,
                    balance: entry.balance,
                    history: Vec::new(),
                },
            );
        }

        info!(
            path = %self.credentials_path.display(),
            users = users.len(),
            "Bootstrapped bank state from credentials"
        );

        Ok(BankSnapshot {
            users,
            completed_txids: Vec::new(),
        })
    }

    /// Persist a snapshot with replace-on-rename.
    pub fn save(&self, snapshot: &BankSnapshot) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.state_path.with_extension("tmp");
        let content =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize bank state")?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.state_path)?;

        info!(
            path = %self.state_path.display(),
            users = snapshot.users.len(),
            "Saved bank state"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "target/test_store_{}_{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = scratch_dir("roundtrip");
        let store = BankStore::new(&dir, &dir, "alpha");

        let mut users = BTreeMap::new();
        users.insert(
            "alice".to_string(),
            PersistedUser {
                password_hash: "$argon2$fake".to_string(),
                balance: 100,
                history: Vec::new(),
            },
        );
        let snapshot = BankSnapshot {
            users,
            completed_txids: vec![CompletedTx {
                txid: TxId::from_bytes([7; 16]),
                kind: HoldKind::Debit,
            }],
        };

        store.save(&snapshot).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.users["alice"].balance, 100);
        assert_eq!(loaded.completed_txids, snapshot.completed_txids);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bootstrap_hashes_passwords() {
        let dir = scratch_dir("bootstrap");
        fs::write(
            dir.join("alpha.json"),
            r#"{"users":[{"username":"alice","password":"pw1","balance":100}]}"#,
        )
        .unwrap();

        let store = BankStore::new(&dir, &dir, "alpha");
        let snapshot = store.load().unwrap();

        let user = &snapshot.users["alice"];
        assert_eq!(user.balance, 100);
        assert_ne!(user.password_hash, "pw1");
        assert!(super::super::accounts::verify_password("pw1", &user.password_hash));
        assert!(!super::super::accounts::verify_password("wrong", &user.password_hash));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_everything_is_fatal() {
        let dir = scratch_dir("missing");
        let store = BankStore::new(&dir, &dir, "ghost");
        assert!(store.load().is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
