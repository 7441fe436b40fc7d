// crates/aem-reporter/src/request.rs
// ============================================================================
// Module: Attribution Request Construction
// Description: Endpoint paths and parameter payloads for attribution requests.
// Purpose: Build configuration, aggregation, debugging, and catalog requests.
// Dependencies: aem-core, serde_json
// ============================================================================

//! ## Overview
//! Pure builders for every request the engine sends. Aggregation entries
//! carry only aggregate fields (campaign, conversion value, consumption
//! delay, signature), never raw event data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use aem_core::BusinessId;
use aem_core::Invocation;
use aem_core::SigningError;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Endpoint suffix for configuration fetches.
const CONFIGS_ENDPOINT: &str = "aem_conversion_configs";
/// Endpoint suffix for aggregation and debugging reports.
const CONVERSIONS_ENDPOINT: &str = "aem_conversions";
/// Endpoint suffix for catalog matching and conversion filtering.
const FILTER_ENDPOINT: &str = "aem_conversion_filter";
/// Delay-flow label for server-mediated reporting.
const DELAY_FLOW: &str = "server";

// ============================================================================
// SECTION: Endpoint Paths
// ============================================================================

/// Path of the configuration fetch for `app_id`.
#[must_use]
pub fn configs_path(app_id: &str) -> String {
    format!("{app_id}/{CONFIGS_ENDPOINT}")
}

/// Path of the aggregation/debugging report for `app_id`.
#[must_use]
pub fn conversions_path(app_id: &str) -> String {
    format!("{app_id}/{CONVERSIONS_ENDPOINT}")
}

/// Path of the catalog match / conversion filter for `app_id`.
#[must_use]
pub fn filter_path(app_id: &str) -> String {
    format!("{app_id}/{FILTER_ENDPOINT}")
}

// ============================================================================
// SECTION: Configuration Request
// ============================================================================

/// Builds the configuration fetch parameters.
///
/// Lists the distinct business scopes among open invocations so the server
/// returns the business-scoped rule sets alongside the general ones.
#[must_use]
pub fn configs_params(invocations: &[Invocation]) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("fields".to_string(), String::new());

    let businesses: BTreeSet<&str> = invocations
        .iter()
        .filter_map(|invocation| invocation.business_id.as_ref())
        .map(BusinessId::as_str)
        .collect();
    if !businesses.is_empty() {
        let ids: Vec<Value> = businesses.into_iter().map(Value::from).collect();
        params.insert("advertiser_ids".to_string(), Value::Array(ids).to_string());
    }
    params
}

// ============================================================================
// SECTION: Aggregation Request
// ============================================================================

/// Builds one aggregation entry for an invocation.
///
/// `delay_hours` is the jittered consumption delay; it is bound into the
/// HMAC signature when the invocation carries a shared secret.
///
/// # Errors
///
/// Returns [`SigningError`] when the invocation's shared secret is present
/// but unusable; the caller abandons the cycle and retries later.
pub fn aggregation_params(
    invocation: &Invocation,
    delay_hours: i64,
) -> Result<BTreeMap<String, String>, SigningError> {
    let mut params = BTreeMap::new();
    params.insert("campaign_id".to_string(), invocation.campaign_id.as_str().to_string());
    params.insert("conversion_data".to_string(), invocation.conversion_value.to_string());
    params.insert("consumption_hour".to_string(), delay_hours.to_string());
    params.insert("token".to_string(), invocation.acs_token.clone());
    params.insert("delay_flow".to_string(), DELAY_FLOW.to_string());

    if let Some(config_id) = &invocation.acs_config_id {
        params.insert("config_id".to_string(), config_id.clone());
    }
    if let Some(business_id) = &invocation.business_id {
        params.insert("advertiser_id".to_string(), business_id.as_str().to_string());
    }
    if let Some(signature) = invocation.report_signature(delay_hours)? {
        params.insert("hmac".to_string(), signature);
    }
    Ok(params)
}

// ============================================================================
// SECTION: Debugging and Catalog Requests
// ============================================================================

/// Builds the debugging report parameters for one invocation.
///
/// Sent for test deep links and for catalog-matched conversions when
/// conversion filtering is enabled.
#[must_use]
pub fn debugging_params(invocation: &Invocation) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("campaign_id".to_string(), invocation.campaign_id.as_str().to_string());
    params.insert("conversion_data".to_string(), invocation.conversion_value.to_string());
    params.insert("token".to_string(), invocation.acs_token.clone());
    params.insert("delay_flow".to_string(), DELAY_FLOW.to_string());
    params.insert("is_conversion_filtering".to_string(), "true".to_string());
    params
}

/// Builds the catalog match query for one invocation and its content ids.
#[must_use]
pub fn catalog_params(catalog_id: &str, content_ids: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("catalog_id".to_string(), catalog_id.to_string());
    params.insert("content_ids".to_string(), content_ids.to_string());
    params
}

/// Extracts content identifiers from event parameters as a JSON array string.
///
/// `fb_content_id` may arrive as a JSON array, a JSON scalar string, or a
/// plain string; all forms normalize to a JSON array of strings. Returns
/// `None` when no content id is present.
#[must_use]
pub fn content_ids(parameters: &Map<String, Value>) -> Option<String> {
    let raw = parameters.get("fb_content_id")?;
    let ids: Vec<Value> = match raw {
        Value::Array(items) => items.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            Ok(Value::String(single)) => vec![Value::from(single)],
            _ => vec![Value::from(text.clone())],
        },
        other => vec![other.clone()],
    };
    if ids.is_empty() {
        return None;
    }
    Some(Value::Array(ids).to_string())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
