// crates/aem-store/src/store.rs
// ============================================================================
// Module: File Report Store
// Description: Versioned JSON snapshot persistence with atomic replace.
// Purpose: Durable storage for invocations, configurations, and scheduling.
// Dependencies: aem-core, serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! Each artifact is one JSON file holding a schema-versioned envelope around
//! the records. Writes go to a temp file in the same directory and are
//! renamed into place, so a crash mid-write leaves the previous snapshot
//! intact. Loads treat missing, corrupt, or version-mismatched files as
//! empty state so one bad artifact never wedges reporting.
//!
//! Security posture: stored files are local state, not a trust boundary, but
//! they are still parsed defensively because other processes can touch them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use aem_core::ConfigurationMap;
use aem_core::Invocation;
use aem_core::ReportStore;
use aem_core::StoreError;
use aem_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Current snapshot schema version.
pub const SCHEMA_VERSION: u32 = 1;
/// File name of the invocation snapshot.
const INVOCATIONS_FILE: &str = "invocations.json";
/// File name of the configuration snapshot.
const CONFIGURATIONS_FILE: &str = "configurations.json";
/// File name of the aggregation schedule snapshot.
const SCHEDULE_FILE: &str = "schedule.json";
/// Suffix of the staging file used for atomic replacement.
const STAGING_SUFFIX: &str = ".tmp";

// ============================================================================
// SECTION: Snapshot Envelope
// ============================================================================

/// Schema-versioned wrapper around persisted records.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    /// Snapshot schema version; mismatches load as empty state.
    schema_version: u32,
    /// Persisted records.
    records: T,
}

// ============================================================================
// SECTION: File Report Store
// ============================================================================

/// File-backed [`ReportStore`] rooted at one directory.
///
/// # Invariants
/// - All snapshots live directly under `root`.
/// - Writes are atomic per artifact; concurrent writers are not supported.
#[derive(Debug)]
pub struct FileReportStore {
    /// Directory holding every snapshot file.
    root: PathBuf,
}

impl FileReportStore {
    /// Opens a store rooted at `root`, creating the directory when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
        })
    }

    /// Returns the directory holding the snapshots.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads an envelope, returning `None` for missing, corrupt, or
    /// version-mismatched files.
    fn load_snapshot<T: DeserializeOwned>(&self, file_name: &str) -> Option<T> {
        let path = self.root.join(file_name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(file = file_name, %error, "snapshot unreadable, loading empty state");
                return None;
            }
        };
        match serde_json::from_slice::<Envelope<T>>(&bytes) {
            Ok(envelope) if envelope.schema_version == SCHEMA_VERSION => Some(envelope.records),
            Ok(envelope) => {
                warn!(
                    file = file_name,
                    found = envelope.schema_version,
                    expected = SCHEMA_VERSION,
                    "snapshot schema mismatch, loading empty state"
                );
                None
            }
            Err(error) => {
                warn!(file = file_name, %error, "snapshot corrupt, loading empty state");
                None
            }
        }
    }

    /// Writes an envelope via staging file and atomic rename.
    fn save_snapshot<T: Serialize>(&self, file_name: &str, records: &T) -> Result<(), StoreError> {
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            records,
        };
        let bytes = serde_json::to_vec(&envelope)?;

        let staging = self.root.join(format!("{file_name}{STAGING_SUFFIX}"));
        let mut file = fs::File::create(&staging)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&staging, self.root.join(file_name))?;
        Ok(())
    }

    /// Removes a snapshot file, ignoring absence.
    fn remove_snapshot(&self, file_name: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.root.join(file_name)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::Io(error)),
        }
    }
}

impl ReportStore for FileReportStore {
    fn load_invocations(&self) -> Result<Vec<Invocation>, StoreError> {
        Ok(self.load_snapshot(INVOCATIONS_FILE).unwrap_or_default())
    }

    fn save_invocations(&self, invocations: &[Invocation]) -> Result<(), StoreError> {
        self.save_snapshot(INVOCATIONS_FILE, &invocations)
    }

    fn load_configurations(&self) -> Result<ConfigurationMap, StoreError> {
        Ok(self.load_snapshot(CONFIGURATIONS_FILE).unwrap_or_default())
    }

    fn save_configurations(&self, configurations: &ConfigurationMap) -> Result<(), StoreError> {
        self.save_snapshot(CONFIGURATIONS_FILE, configurations)
    }

    fn load_aggregation_schedule(&self) -> Result<Option<Timestamp>, StoreError> {
        Ok(self.load_snapshot(SCHEDULE_FILE))
    }

    fn save_aggregation_schedule(&self, not_before: Timestamp) -> Result<(), StoreError> {
        self.save_snapshot(SCHEDULE_FILE, &not_before)
    }

    fn clear_cache(&self) -> Result<(), StoreError> {
        self.remove_snapshot(CONFIGURATIONS_FILE)
    }

    fn reset(&self) -> Result<(), StoreError> {
        self.remove_snapshot(INVOCATIONS_FILE)?;
        self.remove_snapshot(CONFIGURATIONS_FILE)?;
        self.remove_snapshot(SCHEDULE_FILE)?;
        Ok(())
    }
}
