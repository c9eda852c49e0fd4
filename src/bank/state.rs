use std::sync::Arc;

use super::accounts::AccountBook;
use super::store::BankStore;

/// Shared state of one bank participant daemon.
#[derive(Clone)]
pub struct BankState {
    /// Bank name as published in the service registry (`bank/<name>`)
    pub name: String,
    pub book: Arc<AccountBook>,
    pub store: Arc<BankStore>,
}

impl BankState {
    pub fn new(name: impl Into<String>, book: Arc<AccountBook>, store: Arc<BankStore>) -> Self {
        Self {
            name: name.into(),
            book,
            store,
        }
    }
}
