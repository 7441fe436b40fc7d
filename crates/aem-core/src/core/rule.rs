// crates/aem-core/src/core/rule.rs
// ============================================================================
// Module: AEM Conversion Rules
// Description: Priority-ranked rules mapping recorded events to conversion values.
// Purpose: Decide which conversion value an invocation has earned.
// Dependencies: crate::core::event, serde, serde_json
// ============================================================================

//! ## Overview
//! A conversion rule pairs a conversion value with a priority and the set of
//! event requirements that must all be satisfied by an invocation's recorded
//! events and values. Rules are evaluated in descending priority order by the
//! invocation; this module only answers whether one rule is satisfied.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::event::EventRequirement;

// ============================================================================
// SECTION: Conversion Rule
// ============================================================================

/// Recorded per-event, per-currency value maxima kept by an invocation.
pub type RecordedValues = BTreeMap<String, BTreeMap<String, f64>>;

/// One conversion value rule from a configuration.
///
/// # Invariants
/// - `events` is non-empty.
/// - Matching is pure: it only reads the recorded state passed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRule {
    /// Conversion value reported when this rule is the best match.
    pub conversion_value: i32,
    /// Rule priority; higher wins across the rule set.
    pub priority: i32,
    /// Events that must all be satisfied.
    pub events: Vec<EventRequirement>,
}

impl ConversionRule {
    /// Parses a wire-format rule entry.
    ///
    /// Returns `None` when required fields are missing or no event parses.
    #[must_use]
    pub fn from_json(entry: &Value) -> Option<Self> {
        let object = entry.as_object()?;
        let conversion_value = i32::try_from(object.get("conversion_value")?.as_i64()?).ok()?;
        let priority = i32::try_from(object.get("priority")?.as_i64()?).ok()?;
        let entries = object.get("events")?.as_array()?;

        let mut events = Vec::with_capacity(entries.len());
        for event_entry in entries {
            events.push(EventRequirement::from_json(event_entry)?);
        }
        if events.is_empty() {
            return None;
        }

        Some(Self {
            conversion_value,
            priority,
            events,
        })
    }

    /// Returns true when the rule references the named event.
    #[must_use]
    pub fn contains_event(&self, event_name: &str) -> bool {
        self.events.iter().any(|event| event.event_name == event_name)
    }

    /// Returns true when every event requirement is satisfied by the
    /// recorded events and values.
    ///
    /// An event with value thresholds is satisfied when any single currency
    /// reaches its floor.
    #[must_use]
    pub fn is_matched(
        &self,
        recorded_events: &BTreeSet<String>,
        recorded_values: &RecordedValues,
    ) -> bool {
        self.events.iter().all(|event| {
            if !recorded_events.contains(&event.event_name) {
                return false;
            }
            match &event.values {
                None => true,
                Some(thresholds) if thresholds.is_empty() => true,
                Some(thresholds) => {
                    let recorded = recorded_values.get(&event.event_name);
                    thresholds.iter().any(|(currency, floor)| {
                        let observed = recorded
                            .and_then(|by_currency| by_currency.get(currency))
                            .copied()
                            .unwrap_or(0.0);
                        observed >= *floor
                    })
                }
            }
        })
    }
}
