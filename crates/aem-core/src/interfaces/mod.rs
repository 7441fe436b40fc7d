// crates/aem-core/src/interfaces/mod.rs
// ============================================================================
// Module: AEM Core Interfaces
// Description: Host-facing traits for persistence, networking, time, and
// platform attribution.
// Purpose: Keep the core pure by pushing every side effect behind a trait.
// Dependencies: serde_json, thiserror, crate::core
// ============================================================================

//! ## Overview
//! The core owns the data model and evaluation logic; every side effect goes
//! through one of these seams. The reporter engine composes concrete
//! implementations, and tests substitute deterministic fakes.
//! Invariants:
//! - Trait methods never panic; failures travel as typed errors.
//! - [`Clock`] is the only source of time anywhere in the system.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde_json::Value;
use thiserror::Error;

use crate::core::configuration::ConfigurationMap;
use crate::core::invocation::Invocation;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Store
// ============================================================================

/// Errors returned by a [`ReportStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure.
    #[error("store i/o failure: {0}")]
    Io(#[from] std::io::Error),
    /// Record serialization or deserialization failure.
    #[error("store serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable storage for invocations, configurations, and the aggregation
/// schedule.
///
/// # Invariants
/// - Loads after a corrupt or missing artifact return empty state rather
///   than failing, so one bad file never wedges reporting.
pub trait ReportStore: Send {
    /// Loads every persisted invocation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn load_invocations(&self) -> Result<Vec<Invocation>, StoreError>;

    /// Persists the full invocation list, replacing any previous snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O or serialization failure.
    fn save_invocations(&self, invocations: &[Invocation]) -> Result<(), StoreError>;

    /// Loads the persisted configuration map.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn load_configurations(&self) -> Result<ConfigurationMap, StoreError>;

    /// Persists the configuration map, replacing any previous snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O or serialization failure.
    fn save_configurations(&self, configurations: &ConfigurationMap) -> Result<(), StoreError>;

    /// Loads the earliest time the next aggregation request may be sent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn load_aggregation_schedule(&self) -> Result<Option<Timestamp>, StoreError>;

    /// Persists the earliest time the next aggregation request may be sent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O or serialization failure.
    fn save_aggregation_schedule(&self, not_before: Timestamp) -> Result<(), StoreError>;

    /// Deletes the persisted configurations, keeping invocations and the
    /// aggregation schedule.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn clear_cache(&self) -> Result<(), StoreError>;

    /// Deletes every persisted artifact.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn reset(&self) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Network
// ============================================================================

/// Errors returned by an [`AemNetworker`].
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    /// The request never produced a response.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The server answered with a non-success status.
    #[error("server returned status {code}")]
    Server {
        /// HTTP status code of the response.
        code: u16,
    },
    /// The response body was not the expected JSON shape.
    #[error("malformed response payload: {0}")]
    Payload(String),
}

/// Blocking transport to the attribution endpoints.
///
/// Implementations are shared across the engine worker and the short-lived
/// request threads it spawns.
pub trait AemNetworker: Send + Sync {
    /// Issues a GET request against `path` with query `params`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] on transport, status, or payload failure.
    fn get(&self, path: &str, params: &BTreeMap<String, String>)
    -> Result<Value, NetworkError>;

    /// Issues a POST request against `path` with form `params`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] on transport, status, or payload failure.
    fn post(&self, path: &str, params: &BTreeMap<String, String>)
    -> Result<Value, NetworkError>;
}

// ============================================================================
// SECTION: Platform Attribution Channel
// ============================================================================

/// View of the platform-level attribution channel running beside AEM.
///
/// Used to suppress double counting when the platform channel already claims
/// credit for an event.
pub trait PlatformChannel: Send + Sync {
    /// Returns true when the platform channel has stopped tracking.
    fn should_cutoff(&self) -> bool;

    /// Returns true when the platform channel reports the named event.
    fn is_reporting_event(&self, event: &str) -> bool;
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// [`Clock`] backed by the operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Timestamp::from_unix_seconds(seconds)
    }
}
