// crates/aem-reporter/src/lib.rs
// ============================================================================
// Module: AEM Reporter Library
// Description: Attribution engine orchestrating parsing, matching, and reporting.
// Purpose: Drive the AEM lifecycle over the core model and collaborator seams.
// Dependencies: aem-core, rand, serde_json, thiserror, tracing, url
// ============================================================================

//! ## Overview
//! The reporter hosts the attribution engine: it parses attribution deep
//! links, records in-app events against open invocations, refreshes
//! server-delivered configurations, and sends rate-limited aggregation
//! reports.
//! Invariants:
//! - All mutable state is owned by one worker thread; public entry points
//!   post commands and never block on the network.
//! - Commands are processed in submission order.
//! - Public entry points are infallible; failures degrade and are logged.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod engine;
pub mod parser;
pub mod request;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use engine::AemEngine;
pub use engine::EnginePolicy;
pub use engine::RefreshCallback;
pub use engine::EngineSnapshot;
pub use parser::ParseError;
pub use parser::parse_url;
