use std::sync::Arc;

use crate::token::TokenService;

use super::participants::BankDirectory;
use super::twopc::TwoPhaseCoordinator;

/// Shared state of the coordinator daemon.
pub struct CoordinatorState {
    pub tokens: TokenService,
    pub directory: BankDirectory,
    pub engine: TwoPhaseCoordinator,
}

impl CoordinatorState {
    pub fn new(
        tokens: TokenService,
        directory: BankDirectory,
        engine: TwoPhaseCoordinator,
    ) -> Arc<Self> {
        Arc::new(Self {
            tokens,
            directory,
            engine,
        })
    }
}
