// crates/aem-core/src/core/invocation.rs
// ============================================================================
// Module: AEM Invocation
// Description: One attributed install/click instance and its conversion state.
// Purpose: Record matching events and derive the reported conversion value.
// Dependencies: crate::core::{configuration, identifiers, rule, signer, time},
// serde, serde_json
// ============================================================================

//! ## Overview
//! An invocation is created from a parsed attribution deep link and mutated
//! by every matching in-app event. It binds lazily to a configuration by
//! `(mode, valid_from, business_id)` so a configuration refresh never
//! rewrites open invocations.
//! Invariants:
//! - `conversion_value` and `priority` are monotonically non-decreasing.
//! - `recorded_values` keeps the maximum observed value per currency.
//! - `is_aggregated` is cleared on every conversion update and set again only
//!   after a confirmed aggregation send.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::configuration::ConfigMode;
use crate::core::configuration::Configuration;
use crate::core::configuration::ConfigurationMap;
use crate::core::identifiers::BusinessId;
use crate::core::identifiers::CampaignId;
use crate::core::rule::RecordedValues;
use crate::core::signer;
use crate::core::signer::SigningError;
use crate::core::time::SECONDS_PER_DAY;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Sentinel priority meaning no conversion rule has matched yet.
pub const UNMATCHED_PRIORITY: i32 = -1;
/// Sentinel version meaning the invocation is not bound to a configuration.
pub const UNBOUND_CONFIG_ID: i64 = -1;
/// Window after the last conversion during which updates are still accepted.
const CONVERSION_WINDOW_SECONDS: i64 = SECONDS_PER_DAY;
/// Parameter keys whose string values embed JSON payloads.
const EMBEDDED_JSON_KEYS: [&str; 2] = ["fb_content", "fb_content_id"];

// ============================================================================
// SECTION: Link Payload
// ============================================================================

/// Fields extracted from an attribution deep link.
///
/// # Invariants
/// - `campaign_id` and `acs_token` are always present; the parser rejects
///   links without them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPayload {
    /// Campaign identifier.
    pub campaign_id: CampaignId,
    /// Attribution token issued by the server.
    pub acs_token: String,
    /// URL-safe base64 shared secret used to sign reports.
    pub acs_shared_secret: Option<String>,
    /// Server-side configuration identifier echoed back in reports.
    pub acs_config_id: Option<String>,
    /// Business scope of the attribution.
    pub business_id: Option<BusinessId>,
    /// Catalog identifier for catalog-level conversions.
    pub catalog_id: Option<String>,
    /// Whether the link is a test deep link.
    pub is_test_mode: bool,
    /// Whether a platform-level attribution channel also tracks this install.
    pub has_platform_attribution: bool,
}

// ============================================================================
// SECTION: Invocation
// ============================================================================

/// One attributed install/click instance being tracked for conversions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Campaign identifier.
    pub campaign_id: CampaignId,
    /// Attribution token issued by the server.
    pub acs_token: String,
    /// URL-safe base64 shared secret used to sign reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acs_shared_secret: Option<String>,
    /// Server-side configuration identifier echoed back in reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acs_config_id: Option<String>,
    /// Business scope of the attribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<BusinessId>,
    /// Catalog identifier for catalog-level conversions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    /// Whether the link was a test deep link.
    pub is_test_mode: bool,
    /// Whether a platform-level attribution channel also tracks this install.
    pub has_platform_attribution: bool,
    /// Creation time of the invocation.
    pub timestamp: Timestamp,
    /// Mode of the bound configuration.
    pub config_mode: ConfigMode,
    /// Version of the bound configuration; [`UNBOUND_CONFIG_ID`] until bound.
    pub config_id: i64,
    /// Names of events recorded against this invocation.
    pub recorded_events: BTreeSet<String>,
    /// Maximum observed value per event and currency.
    pub recorded_values: RecordedValues,
    /// Current conversion value.
    pub conversion_value: i32,
    /// Priority of the rule that produced `conversion_value`;
    /// [`UNMATCHED_PRIORITY`] until a rule matches.
    pub priority: i32,
    /// Time of the most recent conversion update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_timestamp: Option<Timestamp>,
    /// Whether the current conversion value was included in a confirmed
    /// aggregation request.
    pub is_aggregated: bool,
}

impl Invocation {
    /// Creates a fresh invocation from parsed deep-link fields.
    #[must_use]
    pub fn from_link(link: LinkPayload, now: Timestamp) -> Self {
        Self {
            campaign_id: link.campaign_id,
            acs_token: link.acs_token,
            acs_shared_secret: link.acs_shared_secret,
            acs_config_id: link.acs_config_id,
            business_id: link.business_id,
            catalog_id: link.catalog_id,
            is_test_mode: link.is_test_mode,
            has_platform_attribution: link.has_platform_attribution,
            timestamp: now,
            config_mode: ConfigMode::Default,
            config_id: UNBOUND_CONFIG_ID,
            recorded_events: BTreeSet::new(),
            recorded_values: RecordedValues::new(),
            conversion_value: 0,
            priority: UNMATCHED_PRIORITY,
            conversion_timestamp: None,
            is_aggregated: true,
        }
    }

    // ------------------------------------------------------------------
    // Configuration binding
    // ------------------------------------------------------------------

    /// Resolves the configuration this invocation evaluates against, binding
    /// the invocation to it on first resolution.
    ///
    /// Business-scoped invocations search the CPAS then BRAND lists; general
    /// invocations search DEFAULT. Once bound (`config_id` set), only the
    /// exact `(valid_from, business_id)` configuration resolves, so a refresh
    /// never moves an open invocation to a newer version.
    pub fn find_configuration<'a>(
        &mut self,
        configurations: &'a ConfigurationMap,
    ) -> Option<&'a Configuration> {
        let resolved = self.resolve_configuration(configurations)?;
        if self.config_id == UNBOUND_CONFIG_ID {
            self.config_id = resolved.valid_from;
            self.config_mode = resolved.mode;
        }
        Some(resolved)
    }

    /// Read-only configuration lookup without binding.
    #[must_use]
    pub fn resolve_configuration<'a>(
        &self,
        configurations: &'a ConfigurationMap,
    ) -> Option<&'a Configuration> {
        let candidates = self.candidate_configurations(configurations);
        if self.config_id != UNBOUND_CONFIG_ID {
            return candidates
                .into_iter()
                .find(|config| config.is_same(self.config_id, self.business_id.as_ref()));
        }
        // Newest configuration already valid at the invocation's creation.
        candidates
            .into_iter()
            .rev()
            .find(|config| {
                config.valid_from <= self.timestamp.as_unix_seconds()
                    && config.is_same_business(self.business_id.as_ref())
            })
    }

    /// Collects the candidate configurations for this invocation's scope.
    fn candidate_configurations<'a>(
        &self,
        configurations: &'a ConfigurationMap,
    ) -> Vec<&'a Configuration> {
        let modes: &[ConfigMode] = if self.business_id.is_some() {
            &[ConfigMode::Cpas, ConfigMode::Brand]
        } else {
            &[ConfigMode::Default]
        };
        modes
            .iter()
            .filter_map(|mode| configurations.get(mode))
            .flat_map(|list| list.iter())
            .collect()
    }

    // ------------------------------------------------------------------
    // Event attribution
    // ------------------------------------------------------------------

    /// Records an event against this invocation when it is attributable.
    ///
    /// Returns true when the event is new to the invocation or raises a
    /// recorded value. With `update_cache` true the invocation also binds to
    /// the resolved configuration, pinning the version it evaluates under;
    /// with `update_cache` false the check is performed without mutating
    /// state, which the engine uses for candidate selection.
    pub fn attribute_event(
        &mut self,
        event: &str,
        currency: Option<&str>,
        value: Option<f64>,
        parameters: Option<&Map<String, Value>>,
        configurations: &ConfigurationMap,
        now: Timestamp,
        update_cache: bool,
    ) -> bool {
        let configuration = if update_cache {
            self.find_configuration(configurations)
        } else {
            self.resolve_configuration(configurations)
        };
        let Some(configuration) = configuration else {
            return false;
        };
        if self.is_out_of_window_for(configuration, now)
            || !configuration.event_set.contains(event)
        {
            return false;
        }

        let processed = parameters.map(processed_parameters);
        if let Some(rule) = &configuration.param_rule {
            let empty = Map::new();
            if !rule.matches(processed.as_ref().unwrap_or(&empty)) {
                return false;
            }
        }

        let mut attributed = false;

        if !self.recorded_events.contains(event) {
            if update_cache {
                self.recorded_events.insert(event.to_string());
            }
            attributed = true;
        }

        // Fall back to the default currency when the event currency is not
        // referenced by any rule threshold.
        let mut value_currency = configuration.default_currency.clone();
        if let Some(currency) = currency {
            let upper = currency.to_uppercase();
            if configuration.currency_set.contains(&upper) {
                value_currency = upper;
            }
        }

        if let Some(value) = value {
            let recorded = self
                .recorded_values
                .get(event)
                .and_then(|by_currency| by_currency.get(&value_currency))
                .copied()
                .unwrap_or(0.0);
            if value > recorded {
                if update_cache {
                    self.recorded_values
                        .entry(event.to_string())
                        .or_default()
                        .insert(value_currency, value);
                }
                attributed = true;
            }
        }

        attributed
    }

    /// Re-evaluates the conversion rules after new recorded state.
    ///
    /// Rules are visited in descending priority; only a rule with priority
    /// strictly greater than the current one can update, which keeps the
    /// conversion value monotonically non-decreasing. Returns true when an
    /// update happened.
    pub fn update_conversion_value(
        &mut self,
        configurations: &ConfigurationMap,
        now: Timestamp,
    ) -> bool {
        let Some(configuration) = self.resolve_configuration(configurations) else {
            return false;
        };

        let mut updated = false;
        for rule in &configuration.rules {
            if rule.priority <= self.priority {
                continue;
            }
            if rule.is_matched(&self.recorded_events, &self.recorded_values) {
                self.conversion_value = rule.conversion_value;
                self.priority = rule.priority;
                self.conversion_timestamp = Some(now);
                self.is_aggregated = false;
                updated = true;
            }
        }
        updated
    }

    // ------------------------------------------------------------------
    // Windows
    // ------------------------------------------------------------------

    /// Returns true when the invocation can no longer accept updates.
    ///
    /// True when unresolvable, past the configuration cutoff, or more than
    /// one day past its last conversion update.
    #[must_use]
    pub fn is_out_of_window(&self, configurations: &ConfigurationMap, now: Timestamp) -> bool {
        self.resolve_configuration(configurations)
            .is_none_or(|configuration| self.is_out_of_window_for(configuration, now))
    }

    /// Window check against an already-resolved configuration.
    fn is_out_of_window_for(&self, configuration: &Configuration, now: Timestamp) -> bool {
        if self.is_past_cutoff_for(configuration, now) {
            return true;
        }
        self.conversion_timestamp.is_some_and(|converted_at| {
            now.seconds_since(converted_at) > CONVERSION_WINDOW_SECONDS
        })
    }

    /// Returns true when the configuration cutoff window has elapsed, which
    /// makes the invocation eligible for aggregation.
    #[must_use]
    pub fn is_past_cutoff(&self, configurations: &ConfigurationMap, now: Timestamp) -> bool {
        self.resolve_configuration(configurations)
            .is_none_or(|configuration| self.is_past_cutoff_for(configuration, now))
    }

    /// Cutoff check against an already-resolved configuration.
    fn is_past_cutoff_for(&self, configuration: &Configuration, now: Timestamp) -> bool {
        let cutoff_seconds = configuration.cutoff_days.saturating_mul(SECONDS_PER_DAY);
        now.seconds_since(self.timestamp) > cutoff_seconds
    }

    // ------------------------------------------------------------------
    // Signing
    // ------------------------------------------------------------------

    /// Computes the HMAC signature for an aggregation entry.
    ///
    /// Returns `Ok(None)` when the invocation carries no shared secret or
    /// configuration identifier (unsigned entries are permitted).
    ///
    /// # Errors
    ///
    /// Returns [`SigningError`] when the shared secret is present but does
    /// not decode as URL-safe base64.
    pub fn report_signature(&self, delay: i64) -> Result<Option<String>, SigningError> {
        if self.acs_config_id.is_none() {
            return Ok(None);
        }
        let Some(secret) = &self.acs_shared_secret else {
            return Ok(None);
        };
        let signature =
            signer::sign_report(secret, &self.campaign_id, self.conversion_value, delay)?;
        Ok(Some(signature))
    }
}

// ============================================================================
// SECTION: Parameter Preprocessing
// ============================================================================

/// Expands embedded-JSON parameter values before rule matching.
///
/// The `fb_content` and `fb_content_id` parameters arrive as JSON text; rules
/// address into their decoded structure. Values that fail to decode are left
/// untouched.
#[must_use]
pub fn processed_parameters(parameters: &Map<String, Value>) -> Map<String, Value> {
    let mut processed = parameters.clone();
    for key in EMBEDDED_JSON_KEYS {
        if let Some(Value::String(text)) = processed.get(key)
            && let Ok(decoded) = serde_json::from_str::<Value>(text)
        {
            processed.insert(key.to_string(), decoded);
        }
    }
    processed
}
