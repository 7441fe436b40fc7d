// crates/aem-core/src/core/configuration.rs
// ============================================================================
// Module: AEM Configuration
// Description: Versioned, server-delivered rule sets scoped by mode and business.
// Purpose: Parse and index conversion rule sets for invocation binding.
// Dependencies: crate::core::{identifiers, matcher, rule}, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A configuration is one versioned rule set delivered by the attribution
//! server. Configurations are grouped per mode; within a mode they are kept
//! sorted ascending by `valid_from`, which doubles as the version identifier.
//! Invariants:
//! - Conversion rules are stored in descending priority order; the sort is
//!   stable so server delivery order breaks priority ties.
//! - Business-scoped configurations always carry a parameter rule.
//! - Derived `event_set`/`currency_set` are consistent with the rules.
//!
//! Security posture: configuration payloads are untrusted; malformed entries
//! fail parsing individually without aborting a batch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::BusinessId;
use crate::core::matcher;
use crate::core::matcher::ParameterRule;
use crate::core::matcher::RuleParseError;
use crate::core::rule::ConversionRule;

// ============================================================================
// SECTION: Parse Errors
// ============================================================================

/// Errors returned when parsing a wire-format configuration entry.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ConfigParseError {
    /// A required field is missing or has the wrong type.
    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),
    /// The configuration mode string is not recognized.
    #[error("unknown configuration mode: {0}")]
    UnknownMode(String),
    /// No conversion rule in the entry parsed successfully.
    #[error("configuration has no valid conversion rules")]
    NoRules,
    /// The config-level parameter rule failed to parse.
    #[error("invalid parameter rule: {0}")]
    InvalidParamRule(#[from] RuleParseError),
    /// A business-scoped configuration is missing its parameter rule.
    #[error("business-scoped configuration requires a parameter rule")]
    MissingParamRule,
}

// ============================================================================
// SECTION: Configuration Mode
// ============================================================================

/// Configuration mode scoping how invocations bind to rule sets.
///
/// # Invariants
/// - Wire and persisted forms are the uppercase mode strings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum ConfigMode {
    /// General configurations for invocations without a business identifier.
    #[default]
    #[serde(rename = "DEFAULT")]
    Default,
    /// Business-scoped brand configurations.
    #[serde(rename = "BRAND")]
    Brand,
    /// Business-scoped catalog (CPAS) configurations.
    #[serde(rename = "CPAS")]
    Cpas,
}

impl ConfigMode {
    /// Returns the stable wire label for the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Brand => "BRAND",
            Self::Cpas => "CPAS",
        }
    }

    /// Parses a wire mode label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "DEFAULT" => Some(Self::Default),
            "BRAND" => Some(Self::Brand),
            "CPAS" => Some(Self::Cpas),
            _ => None,
        }
    }
}

/// Configurations grouped by mode, each list sorted ascending by `valid_from`.
pub type ConfigurationMap = BTreeMap<ConfigMode, Vec<Configuration>>;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// One versioned, server-delivered conversion rule set.
///
/// # Invariants
/// - `valid_from` is the version identifier; higher means newer.
/// - `rules` is non-empty and sorted by descending priority (stable).
/// - `param_rule` is present whenever `business_id` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Version identifier: unix timestamp the configuration became valid.
    pub valid_from: i64,
    /// Mode the configuration belongs to.
    pub mode: ConfigMode,
    /// Business scope; absent for general configurations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<BusinessId>,
    /// Currency used when an event's currency is not in `currency_set`.
    pub default_currency: String,
    /// Attribution window in days from the invocation timestamp.
    pub cutoff_days: i64,
    /// Config-level targeting rule; required for business-scoped configs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_rule: Option<ParameterRule>,
    /// Conversion rules in descending priority order.
    pub rules: Vec<ConversionRule>,
    /// Event names referenced by any rule; used to short-circuit matching.
    pub event_set: BTreeSet<String>,
    /// Uppercase currencies referenced by any rule value threshold.
    pub currency_set: BTreeSet<String>,
}

impl Configuration {
    /// Parses a wire-format configuration entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigParseError`] when required fields are absent, the mode
    /// is unknown, no rule parses, or a business-scoped entry lacks its
    /// parameter rule.
    pub fn from_json(entry: &Value) -> Result<Self, ConfigParseError> {
        let object =
            entry.as_object().ok_or(ConfigParseError::MissingField("configuration entry"))?;

        let default_currency = object
            .get("default_currency")
            .and_then(Value::as_str)
            .ok_or(ConfigParseError::MissingField("default_currency"))?
            .to_string();
        let cutoff_days = object
            .get("cutoff_time")
            .and_then(Value::as_i64)
            .ok_or(ConfigParseError::MissingField("cutoff_time"))?;
        let valid_from = object
            .get("valid_from")
            .and_then(Value::as_i64)
            .ok_or(ConfigParseError::MissingField("valid_from"))?;
        let mode_label = object
            .get("config_mode")
            .and_then(Value::as_str)
            .ok_or(ConfigParseError::MissingField("config_mode"))?;
        let mode = ConfigMode::parse(mode_label)
            .ok_or_else(|| ConfigParseError::UnknownMode(mode_label.to_string()))?;

        let business_id = object
            .get("advertiser_id")
            .and_then(Value::as_str)
            .map(|id| BusinessId::new(id.to_string()));

        let param_rule = match object.get("param_rule").and_then(Value::as_str) {
            Some(text) => Some(matcher::parse_rule_text(text)?),
            None => None,
        };
        if business_id.is_some() && param_rule.is_none() {
            return Err(ConfigParseError::MissingParamRule);
        }

        let rule_entries = object
            .get("conversion_value_rules")
            .and_then(Value::as_array)
            .ok_or(ConfigParseError::MissingField("conversion_value_rules"))?;
        let mut rules: Vec<ConversionRule> =
            rule_entries.iter().filter_map(ConversionRule::from_json).collect();
        if rules.is_empty() {
            return Err(ConfigParseError::NoRules);
        }
        // Stable sort keeps server delivery order as the tie breaker.
        rules.sort_by_key(|rule| std::cmp::Reverse(rule.priority));

        let event_set = derive_event_set(&rules);
        let currency_set = derive_currency_set(&rules);

        Ok(Self {
            valid_from,
            mode,
            business_id,
            default_currency,
            cutoff_days,
            param_rule,
            rules,
            event_set,
            currency_set,
        })
    }

    /// Returns true when version and business scope both match.
    #[must_use]
    pub fn is_same(&self, valid_from: i64, business_id: Option<&BusinessId>) -> bool {
        self.valid_from == valid_from && self.is_same_business(business_id)
    }

    /// Returns true when the business scope matches.
    #[must_use]
    pub fn is_same_business(&self, business_id: Option<&BusinessId>) -> bool {
        self.business_id.as_ref() == business_id
    }
}

/// Collects every event name referenced by the rules.
fn derive_event_set(rules: &[ConversionRule]) -> BTreeSet<String> {
    rules
        .iter()
        .flat_map(|rule| rule.events.iter())
        .map(|event| event.event_name.clone())
        .collect()
}

/// Collects every uppercase currency referenced by rule value thresholds.
fn derive_currency_set(rules: &[ConversionRule]) -> BTreeSet<String> {
    rules
        .iter()
        .flat_map(|rule| rule.events.iter())
        .filter_map(|event| event.values.as_ref())
        .flat_map(|thresholds| thresholds.keys())
        .map(|currency| currency.to_uppercase())
        .collect()
}
