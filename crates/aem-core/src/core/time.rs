// crates/aem-core/src/core/time.rs
// ============================================================================
// Module: AEM Time Model
// Description: Canonical timestamp representation for invocation records.
// Purpose: Provide deterministic, replayable time values across AEM state.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! AEM uses explicit epoch-second timestamps embedded in invocation records
//! to keep evaluation deterministic. The core never reads wall-clock time
//! directly; the engine supplies timestamps via its [`Clock`] collaborator.
//!
//! [`Clock`]: crate::interfaces::Clock

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Number of seconds in one day, the unit of configuration cutoff windows.
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Canonical timestamp used in AEM records.
///
/// # Invariants
/// - Values are unix epoch seconds supplied by callers; the core never reads
///   wall-clock time.
/// - Arithmetic is saturating; no overflow panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch seconds.
    #[must_use]
    pub const fn from_unix_seconds(seconds: i64) -> Self {
        Self(seconds)
    }

    /// Returns the timestamp as unix epoch seconds.
    #[must_use]
    pub const fn as_unix_seconds(self) -> i64 {
        self.0
    }

    /// Returns the number of seconds elapsed from `earlier` to `self`.
    ///
    /// Negative when `self` precedes `earlier`.
    #[must_use]
    pub const fn seconds_since(self, earlier: Self) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Returns the timestamp shifted forward by `seconds`.
    #[must_use]
    pub const fn plus_seconds(self, seconds: i64) -> Self {
        Self(self.0.saturating_add(seconds))
    }
}
