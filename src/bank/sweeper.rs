//! Hold expiry worker
//!
//! Background task that removes holds whose deadline passed. An expired
//! debit hold is equivalent to an implicit abort; the balance is untouched.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::accounts::AccountBook;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to scan for expired holds
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

pub struct HoldSweeper {
    book: Arc<AccountBook>,
    config: SweeperConfig,
}

impl HoldSweeper {
    pub fn new(book: Arc<AccountBook>, config: SweeperConfig) -> Self {
        Self { book, config }
    }

    /// Run the sweep loop forever.
    pub async fn run(&self) -> ! {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting hold sweeper"
        );

        loop {
            tokio::time::sleep(self.config.interval).await;

            let expired = self.book.expire_holds();
            if expired > 0 {
                info!(count = expired, "Expired holds swept");
            } else {
                debug!("No expired holds");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweeper_config_default() {
        let config = SweeperConfig::default();
        assert_eq!(config.interval, Duration::from_secs(1));
    }
}
