// crates/aem-core/src/core/event.rs
// ============================================================================
// Module: AEM Event Requirements
// Description: Event name and per-currency value thresholds referenced by rules.
// Purpose: Describe which logged events (and value floors) a conversion rule needs.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! An event requirement names an in-app event and, optionally, the minimum
//! value per currency that must have been recorded for a conversion rule to
//! match. Currencies are normalized to uppercase at parse time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Event Requirement
// ============================================================================

/// One event referenced by a conversion rule.
///
/// # Invariants
/// - `values` keys are uppercase ISO currency codes.
/// - An absent or empty `values` map means the event only needs to occur.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRequirement {
    /// In-app event name, e.g. `fb_mobile_purchase`.
    pub event_name: String,
    /// Minimum recorded value per currency; any currency reaching its floor
    /// satisfies the requirement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, f64>>,
}

impl EventRequirement {
    /// Parses a wire-format event entry.
    ///
    /// The wire shape is `{"event_name": .., "values": [{"currency": ..,
    /// "amount": ..}, ..]}` with `values` optional. Returns `None` when the
    /// entry is malformed.
    #[must_use]
    pub fn from_json(entry: &Value) -> Option<Self> {
        let object = entry.as_object()?;
        let event_name = object.get("event_name")?.as_str()?.to_string();
        if event_name.is_empty() {
            return None;
        }

        let values = match object.get("values") {
            None | Some(Value::Null) => None,
            Some(Value::Array(entries)) => {
                let mut thresholds = BTreeMap::new();
                for value_entry in entries {
                    let value_object = value_entry.as_object()?;
                    let currency = value_object.get("currency")?.as_str()?.to_uppercase();
                    let amount = value_object.get("amount")?.as_f64()?;
                    thresholds.insert(currency, amount);
                }
                if thresholds.is_empty() { None } else { Some(thresholds) }
            }
            Some(_) => return None,
        };

        Some(Self {
            event_name,
            values,
        })
    }
}
