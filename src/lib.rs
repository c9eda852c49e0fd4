//! payrail - Distributed Payment Gateway
//!
//! Atomic cross-bank transfers via two-phase commit: a central coordinator
//! authenticates users, issues short-lived bearer tokens, and drives
//! prepare/commit across two bank participants. Clients queue transfers
//! while the coordinator is unreachable and replay them with stable
//! transaction identity.
//!
//! # Modules
//!
//! - [`core_types`] - TxId, amounts, subjects, history records
//! - [`config`] - YAML configuration with env overrides
//! - [`proto`] - wire DTOs shared by all components
//! - [`response`] - unified API envelope and error codes
//! - [`token`] - bearer token mint/verify
//! - [`registry`] - service discovery (name → address)
//! - [`coordinator`] - 2PC engine, idempotency registry, decision log
//! - [`bank`] - account book, holds, participant protocol
//! - [`client`] - session, offline queue, drain worker

// Core types - must be first!
pub mod core_types;

// Configuration + logging
pub mod config;
pub mod logging;

// Shared wire surface
pub mod proto;
pub mod response;

// Collaborators
pub mod registry;
pub mod token;

// Components
pub mod bank;
pub mod client;
pub mod coordinator;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use core_types::{Amount, Direction, Subject, TransactionRecord, TxId};
pub use proto::{TransferOutcome, TransferRequest};
