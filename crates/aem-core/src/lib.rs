// crates/aem-core/src/lib.rs
// ============================================================================
// Module: AEM Core Library
// Description: Data model and evaluation logic for Aggregated Event Measurement.
// Purpose: Provide deterministic rule matching, conversion state, and signing.
// Dependencies: serde, serde_json, sha2, base64, regex, thiserror
// ============================================================================

//! ## Overview
//! AEM Core holds the pure subset of the Aggregated Event Measurement
//! attribution engine: parameter rules and their operators, conversion rules,
//! server-delivered configurations, invocation state, and the HMAC report
//! signer.
//! Invariants:
//! - Rule evaluation is deterministic and free of side effects.
//! - Conversion value and priority are monotonically non-decreasing per
//!   invocation.
//! - The core never reads wall-clock time; hosts supply a [`Clock`].
//!
//! Security posture: deep-link fields, event parameters, and server
//! configuration payloads are untrusted input.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::configuration::ConfigMode;
pub use crate::core::configuration::ConfigParseError;
pub use crate::core::configuration::Configuration;
pub use crate::core::configuration::ConfigurationMap;
pub use crate::core::event::EventRequirement;
pub use crate::core::identifiers::BusinessId;
pub use crate::core::identifiers::CampaignId;
pub use crate::core::invocation::Invocation;
pub use crate::core::invocation::LinkPayload;
pub use crate::core::matcher::MultiEntryOperator;
pub use crate::core::matcher::MultiEntryRule;
pub use crate::core::matcher::ParameterRule;
pub use crate::core::matcher::RuleOperator;
pub use crate::core::matcher::RuleParseError;
pub use crate::core::matcher::SingleEntryRule;
pub use crate::core::rule::ConversionRule;
pub use crate::core::signer;
pub use crate::core::signer::Base64DecodeError;
pub use crate::core::signer::SigningError;
pub use crate::core::time::SECONDS_PER_DAY;
pub use crate::core::time::Timestamp;
pub use crate::interfaces::AemNetworker;
pub use crate::interfaces::Clock;
pub use crate::interfaces::NetworkError;
pub use crate::interfaces::PlatformChannel;
pub use crate::interfaces::ReportStore;
pub use crate::interfaces::StoreError;
pub use crate::interfaces::SystemClock;
