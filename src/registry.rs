//! Service registry client
//!
//! Name → address discovery for the coordinator (`coordinator`) and the
//! banks (`bank/<name>`). Backed by a shared JSON file written with
//! replace-on-rename so readers never observe a torn write. Health is not
//! stored here: consumers probe each service's `/api/v1/ping` themselves.
//!
//! Services register at startup and deregister on graceful shutdown; a
//! crashed service leaves a stale entry behind, which consumers detect as
//! `unavailable` when the ping or RPC fails.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

/// One published service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// host:port of the HTTP surface
    pub addr: String,
    /// Unix millis at registration
    pub registered_at_ms: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    services: BTreeMap<String, ServiceEntry>,
}

/// Well-known registry name for the coordinator.
pub const COORDINATOR: &str = "coordinator";

/// Registry name for a bank participant.
pub fn bank_service(name: &str) -> String {
    format!("bank/{}", name)
}

pub struct ServiceRegistry {
    path: PathBuf,
}

impl ServiceRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publish `name` at `addr`, replacing any previous entry.
    pub fn register(&self, name: &str, addr: &str) -> io::Result<()> {
        self.update(|file| {
            file.services.insert(
                name.to_string(),
                ServiceEntry {
                    addr: addr.to_string(),
                    registered_at_ms: chrono::Utc::now().timestamp_millis(),
                },
            );
        })?;
        info!(service = name, addr = addr, "Registered service");
        Ok(())
    }

    /// Remove `name`. Removing an absent name is a no-op.
    pub fn deregister(&self, name: &str) -> io::Result<()> {
        self.update(|file| {
            file.services.remove(name);
        })?;
        info!(service = name, "Deregistered service");
        Ok(())
    }

    /// Resolve a service name to its published address.
    pub fn lookup(&self, name: &str) -> io::Result<Option<ServiceEntry>> {
        Ok(self.read()?.services.get(name).cloned())
    }

    /// All currently registered names.
    pub fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.read()?.services.keys().cloned().collect())
    }

    fn read(&self) -> io::Result<RegistryFile> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RegistryFile::default()),
            Err(e) => Err(e),
        }
    }

    /// Read-modify-replace. The rename makes the new content visible
    /// atomically; concurrent writers are rare (registration happens at
    /// process start/stop) and last-writer-wins is acceptable here.
    fn update(&self, mutate: impl FnOnce(&mut RegistryFile)) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = self.read()?;
        mutate(&mut file);

        let tmp = self.path.with_extension("tmp");
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
