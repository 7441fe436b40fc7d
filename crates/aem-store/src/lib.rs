// crates/aem-store/src/lib.rs
// ============================================================================
// Module: AEM Store Library
// Description: File-backed durable storage for AEM reporting state.
// Purpose: Persist invocations, configurations, and the aggregation schedule.
// Dependencies: aem-core, serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! File-backed implementation of the [`aem_core::ReportStore`] seam. State is
//! written as versioned JSON snapshots with atomic replace semantics.
//! Invariants:
//! - Every write lands via temp-file-then-rename; readers never observe a
//!   partial snapshot.
//! - Corrupt or missing artifacts load as empty state, never an error.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::FileReportStore;
pub use store::SCHEMA_VERSION;
