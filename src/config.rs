use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub bank: BankConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Path of the shared service-registry file
    pub path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: "./data/registry.json".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,
    /// Validity of an issued token (TOKEN_TTL)
    pub token_ttl_secs: u64,
    /// Deadline for the entire prepare phase (TIMEOUT2PC)
    pub timeout_2pc_ms: u64,
    /// Backoff cap for commit/abort delivery retries
    pub commit_backoff_cap_ms: u64,
    /// How long a Transfer reply waits on commit delivery before the
    /// delivery continues detached
    pub apply_grace_ms: u64,
    /// Per-request timeout towards the banks
    pub rpc_timeout_ms: u64,
    /// Durable decision log
    pub wal_path: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7600,
            jwt_secret: "dev-secret-change-me".to_string(),
            token_ttl_secs: 3600,
            timeout_2pc_ms: 5_000,
            commit_backoff_cap_ms: 30_000,
            apply_grace_ms: 2_000,
            rpc_timeout_ms: 10_000,
            wal_path: "./data/coordinator/decisions.log".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BankConfig {
    pub host: String,
    /// 0 = ephemeral; the bound address is what gets registered
    pub port: u16,
    /// State files live here, one per bank name
    pub data_dir: String,
    /// Credential bootstrap files, `<name>.json` per bank
    pub credentials_dir: String,
    /// Hold expiry (HOLD_TTL). None = 2 × timeout_2pc_ms
    pub hold_ttl_ms: Option<u64>,
    /// Expiry sweep cadence
    pub sweep_interval_ms: u64,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            data_dir: "./data/banks".to_string(),
            credentials_dir: "./config/credentials".to_string(),
            hold_ttl_ms: None,
            sweep_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Offline-queue poll interval (OFFLINE_POLL)
    pub offline_poll_ms: u64,
    /// Per-request timeout towards the coordinator
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            offline_poll_ms: 200,
            request_timeout_ms: 10_000,
        }
    }
}

impl AppConfig {
    /// Load config from YAML file based on environment
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config: Self =
            serde_yaml::from_str(&content).context("Failed to parse config yaml")?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Environment variables take precedence over YAML config.
    ///
    /// Supported overrides:
    /// - PAYRAIL_LOG_LEVEL: log level (trace/debug/info/warn/error)
    /// - PAYRAIL_REGISTRY_PATH: service registry file
    /// - PAYRAIL_COORDINATOR_PORT: coordinator listen port (u16)
    /// - PAYRAIL_JWT_SECRET: token signing secret
    /// - PAYRAIL_TIMEOUT2PC_MS: prepare-phase deadline (u64 ms)
    /// - PAYRAIL_HOLD_TTL_MS: bank hold expiry (u64 ms)
    /// - PAYRAIL_TOKEN_TTL_SECS: token validity (u64 s)
    /// - PAYRAIL_OFFLINE_POLL_MS: client queue poll interval (u64 ms)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("PAYRAIL_LOG_LEVEL") {
            tracing::info!("Config override: log_level = {} (from PAYRAIL_LOG_LEVEL)", level);
            self.log_level = level;
        }
        if let Ok(path) = std::env::var("PAYRAIL_REGISTRY_PATH") {
            tracing::info!("Config override: registry.path = {} (from PAYRAIL_REGISTRY_PATH)", path);
            self.registry.path = path;
        }
        if let Ok(port) = std::env::var("PAYRAIL_COORDINATOR_PORT")
            && let Ok(p) = port.parse::<u16>()
        {
            tracing::info!("Config override: coordinator.port = {} (from PAYRAIL_COORDINATOR_PORT)", p);
            self.coordinator.port = p;
        }
        if let Ok(secret) = std::env::var("PAYRAIL_JWT_SECRET") {
            tracing::info!("Config override: coordinator.jwt_secret = [REDACTED] (from PAYRAIL_JWT_SECRET)");
            self.coordinator.jwt_secret = secret;
        }
        if let Ok(ms) = std::env::var("PAYRAIL_TIMEOUT2PC_MS")
            && let Ok(v) = ms.parse::<u64>()
        {
            tracing::info!("Config override: coordinator.timeout_2pc_ms = {} (from PAYRAIL_TIMEOUT2PC_MS)", v);
            self.coordinator.timeout_2pc_ms = v;
        }
        if let Ok(ms) = std::env::var("PAYRAIL_HOLD_TTL_MS")
            && let Ok(v) = ms.parse::<u64>()
        {
            tracing::info!("Config override: bank.hold_ttl_ms = {} (from PAYRAIL_HOLD_TTL_MS)", v);
            self.bank.hold_ttl_ms = Some(v);
        }
        if let Ok(secs) = std::env::var("PAYRAIL_TOKEN_TTL_SECS")
            && let Ok(v) = secs.parse::<u64>()
        {
            tracing::info!("Config override: coordinator.token_ttl_secs = {} (from PAYRAIL_TOKEN_TTL_SECS)", v);
            self.coordinator.token_ttl_secs = v;
        }
        if let Ok(ms) = std::env::var("PAYRAIL_OFFLINE_POLL_MS")
            && let Ok(v) = ms.parse::<u64>()
        {
            tracing::info!("Config override: client.offline_poll_ms = {} (from PAYRAIL_OFFLINE_POLL_MS)", v);
            self.client.offline_poll_ms = v;
        }
    }

    /// Validate configuration at startup
    ///
    /// Returns an error if any critical configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log_level '{}': must be one of {:?}",
                self.log_level,
                valid_levels
            );
        }

        if self.coordinator.timeout_2pc_ms == 0 {
            anyhow::bail!("Invalid coordinator.timeout_2pc_ms: must be > 0");
        }

        // A hold must outlive the prepare deadline, otherwise a prepared
        // hold can expire while the coordinator is still deciding.
        if let Some(ttl) = self.bank.hold_ttl_ms
            && ttl <= self.coordinator.timeout_2pc_ms
        {
            anyhow::bail!(
                "Invalid bank.hold_ttl_ms {}: must exceed coordinator.timeout_2pc_ms {}",
                ttl,
                self.coordinator.timeout_2pc_ms
            );
        }

        if self.coordinator.token_ttl_secs == 0 {
            anyhow::bail!("Invalid coordinator.token_ttl_secs: must be > 0");
        }

        if self.client.offline_poll_ms == 0 {
            anyhow::bail!("Invalid client.offline_poll_ms: must be > 0");
        }

        Ok(())
    }

    /// Effective hold TTL: configured value or 2 × the prepare deadline.
    pub fn hold_ttl(&self) -> Duration {
        Duration::from_millis(
            self.bank
                .hold_ttl_ms
                .unwrap_or(2 * self.coordinator.timeout_2pc_ms),
        )
    }

    pub fn timeout_2pc(&self) -> Duration {
        Duration::from_millis(self.coordinator.timeout_2pc_ms)
    }

    pub fn offline_poll(&self) -> Duration {
        Duration::from_millis(self.client.offline_poll_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "payrail.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            registry: RegistryConfig::default(),
            coordinator: CoordinatorConfig::default(),
            bank: BankConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = AppConfig::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_hold_ttl_must_exceed_2pc_deadline() {
        let mut config = AppConfig::default();
        config.bank.hold_ttl_ms = Some(config.coordinator.timeout_2pc_ms);
        assert!(config.validate().is_err());

        config.bank.hold_ttl_ms = Some(config.coordinator.timeout_2pc_ms + 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hold_ttl_defaults_to_twice_2pc() {
        let config = AppConfig::default();
        assert_eq!(
            config.hold_ttl(),
            Duration::from_millis(2 * config.coordinator.timeout_2pc_ms)
        );
    }
}
