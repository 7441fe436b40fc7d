// crates/aem-core/src/core/mod.rs
// ============================================================================
// Module: AEM Core Model
// Description: Core data model for AEM attribution.
// Purpose: Group identifiers, time, rules, configurations, and invocations.
// Dependencies: crate submodules
// ============================================================================

//! ## Overview
//! The core model is split leaf-first: identifiers and time carry no
//! dependencies, the matcher evaluates parameter rules, conversion rules sit
//! above recorded event state, and configurations and invocations tie the
//! pieces together.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod configuration;
pub mod event;
pub mod identifiers;
pub mod invocation;
pub mod matcher;
pub mod rule;
pub mod signer;
pub mod time;
