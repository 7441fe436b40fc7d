// crates/aem-core/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Shared helpers for aem-core tests.
// Purpose: Provide wire-format configuration builders for parsing and
// invocation tests.
// Dependencies: aem-core, serde_json
// ============================================================================

//! ## Overview
//! Builders for wire-format configuration payloads and configuration maps
//! used across the aem-core integration tests.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    dead_code,
    reason = "Test-only helpers and panic-based assertions are permitted."
)]

use aem_core::ConfigMode;
use aem_core::Configuration;
use aem_core::ConfigurationMap;
use serde_json::Value;
use serde_json::json;

/// Wire-format DEFAULT-mode configuration with purchase and subscribe rules.
///
/// Rule priorities: purchase+subscribe at 10 (value 6), purchase with a
/// 50 USD floor at 7 (value 4), purchase at 5 (value 2), subscribe at 2
/// (value 1).
pub fn default_config_json(valid_from: i64) -> Value {
    json!({
        "default_currency": "USD",
        "cutoff_time": 1,
        "valid_from": valid_from,
        "config_mode": "DEFAULT",
        "conversion_value_rules": [
            {
                "conversion_value": 6,
                "priority": 10,
                "events": [
                    {"event_name": "fb_mobile_purchase"},
                    {"event_name": "Subscribe"}
                ]
            },
            {
                "conversion_value": 4,
                "priority": 7,
                "events": [
                    {
                        "event_name": "fb_mobile_purchase",
                        "values": [{"currency": "usd", "amount": 50.0}]
                    }
                ]
            },
            {
                "conversion_value": 2,
                "priority": 5,
                "events": [{"event_name": "fb_mobile_purchase"}]
            },
            {
                "conversion_value": 1,
                "priority": 2,
                "events": [{"event_name": "Subscribe"}]
            }
        ]
    })
}

/// Wire-format BRAND-mode configuration scoped to `business_id` with a
/// content-targeting parameter rule.
pub fn brand_config_json(valid_from: i64, business_id: &str) -> Value {
    let param_rule = json!({"fb_content[*].id": {"eq": "coffee"}}).to_string();
    json!({
        "default_currency": "USD",
        "cutoff_time": 2,
        "valid_from": valid_from,
        "config_mode": "BRAND",
        "advertiser_id": business_id,
        "param_rule": param_rule,
        "conversion_value_rules": [
            {
                "conversion_value": 3,
                "priority": 8,
                "events": [{"event_name": "fb_mobile_purchase"}]
            }
        ]
    })
}

/// Parses a wire entry into a [`Configuration`], panicking on failure.
pub fn parse_config(entry: &Value) -> Configuration {
    Configuration::from_json(entry).expect("configuration fixture must parse")
}

/// Builds a configuration map from parsed configurations, grouped by mode
/// and sorted ascending by `valid_from` within each mode.
pub fn config_map(configurations: Vec<Configuration>) -> ConfigurationMap {
    let mut map = ConfigurationMap::new();
    for configuration in configurations {
        map.entry(configuration.mode).or_default().push(configuration);
    }
    for list in map.values_mut() {
        list.sort_by_key(|configuration| configuration.valid_from);
    }
    map
}

/// Single-mode map with one DEFAULT configuration valid from `valid_from`.
pub fn default_config_map(valid_from: i64) -> ConfigurationMap {
    config_map(vec![parse_config(&default_config_json(valid_from))])
}

/// Returns the modes present in a configuration map, for assertions.
pub fn modes_of(map: &ConfigurationMap) -> Vec<ConfigMode> {
    map.keys().copied().collect()
}
