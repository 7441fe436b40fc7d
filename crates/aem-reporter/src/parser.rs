// crates/aem-reporter/src/parser.rs
// ============================================================================
// Module: Attribution Deep-Link Parser
// Description: Extraction of attribution fields from invocation deep links.
// Purpose: Turn untrusted deep-link URLs into validated link payloads.
// Dependencies: aem-core, serde_json, thiserror, url
// ============================================================================

//! ## Overview
//! Attribution deep links carry their fields as query parameters, optionally
//! wrapped in an `al_applink_data` JSON blob. Direct query parameters are
//! authoritative; the blob only fills fields the query leaves unset. Unknown
//! parameters are tolerated.
//!
//! Security posture: the URL is untrusted input. Required fields are
//! validated and the shared secret must decode as URL-safe base64 before any
//! payload is produced.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use aem_core::BusinessId;
use aem_core::CampaignId;
use aem_core::LinkPayload;
use aem_core::signer;
use serde_json::Value;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Query parameter wrapping the App Links JSON payload.
const APPLINK_DATA_KEY: &str = "al_applink_data";
/// Query parameters treated as boolean test-mode flags.
const TEST_MODE_KEYS: [&str; 2] = ["test_deeplink", "test_mode"];
/// Query parameter flagging a parallel platform attribution channel.
const PLATFORM_ATTRIBUTION_KEY: &str = "has_skan";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned when a deep link cannot be parsed.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The string is not a parseable URL.
    #[error("not a parseable url: {0}")]
    InvalidUrl(String),
    /// The `campaign_id` parameter is missing or empty.
    #[error("missing campaign_id parameter")]
    MissingCampaignId,
    /// The `acs_token` parameter is missing or empty.
    #[error("missing acs_token parameter")]
    MissingToken,
    /// The shared secret is present but not valid URL-safe base64.
    #[error("acs_shared_secret is not valid url-safe base64")]
    InvalidToken,
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses an attribution deep link into a [`LinkPayload`].
///
/// `campaign_id` and `acs_token` are required. When both `business_id` and
/// the legacy `advertiser_id` are present, `business_id` wins.
///
/// # Errors
///
/// Returns [`ParseError`] when the URL is malformed, a required field is
/// absent, or the shared secret fails to decode.
pub fn parse_url(link: &str) -> Result<LinkPayload, ParseError> {
    let url = Url::parse(link).map_err(|error| ParseError::InvalidUrl(error.to_string()))?;

    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        fields.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    merge_applink_data(&mut fields);

    let campaign_id = fields
        .get("campaign_id")
        .filter(|id| !id.is_empty())
        .ok_or(ParseError::MissingCampaignId)?;
    let acs_token = fields
        .get("acs_token")
        .filter(|token| !token.is_empty())
        .ok_or(ParseError::MissingToken)?;

    let acs_shared_secret = fields.get("acs_shared_secret").filter(|secret| !secret.is_empty());
    if let Some(secret) = acs_shared_secret
        && signer::decode_base64_url(secret).is_err()
    {
        return Err(ParseError::InvalidToken);
    }

    let business_id = fields
        .get("business_id")
        .or_else(|| fields.get("advertiser_id"))
        .filter(|id| !id.is_empty());

    let is_test_mode = TEST_MODE_KEYS
        .iter()
        .any(|key| fields.get(*key).is_some_and(|flag| parse_flag(flag)));
    let has_platform_attribution =
        fields.get(PLATFORM_ATTRIBUTION_KEY).is_some_and(|flag| parse_flag(flag));

    Ok(LinkPayload {
        campaign_id: CampaignId::new(campaign_id.clone()),
        acs_token: acs_token.clone(),
        acs_shared_secret: acs_shared_secret.cloned(),
        acs_config_id: fields.get("acs_config_id").filter(|id| !id.is_empty()).cloned(),
        business_id: business_id.map(|id| BusinessId::new(id.clone())),
        catalog_id: fields.get("catalog_id").filter(|id| !id.is_empty()).cloned(),
        is_test_mode,
        has_platform_attribution,
    })
}

/// Folds fields from the `al_applink_data` JSON blob into the field map.
///
/// Direct query parameters take precedence; blob fields only fill gaps.
/// A blob that is not a JSON object is ignored.
fn merge_applink_data(fields: &mut BTreeMap<String, String>) {
    let Some(blob) = fields.get(APPLINK_DATA_KEY).cloned() else {
        return;
    };
    let Ok(Value::Object(data)) = serde_json::from_str::<Value>(&blob) else {
        return;
    };
    for (key, value) in data {
        let text = match value {
            Value::String(text) => text,
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            _ => continue,
        };
        fields.entry(key).or_insert(text);
    }
}

/// Interprets a query value as a boolean flag.
fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes")
}

// ============================================================================
// SECTION: Tests
// ============================================================================
