// crates/aem-core/src/core/matcher.rs
// ============================================================================
// Module: AEM Parameter Rule Matcher
// Description: Single-entry and multi-entry rule evaluation over event parameters.
// Purpose: Convert server-delivered targeting rules into boolean outcomes.
// Dependencies: regex, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Parameter rules are the targeting predicates delivered inside a
//! configuration. A rule is either a single-entry comparison against one
//! parameter path or a multi-entry combinator over child rules.
//! Invariants:
//! - Evaluation is deterministic and free of side effects; the same
//!   `(rule, parameters)` pair always yields the same result.
//! - `And` stops at the first false child; `Or` stops at the first true child.
//! - A `[*]` path segment quantifies existentially over array elements.
//! - Missing keys, type mismatches, and invalid regex patterns evaluate to
//!   `false`, never an error.
//!
//! Security posture: rules and event parameters are untrusted input; parsing
//! fails closed and evaluation never panics.

// ============================================================================
// SECTION: Imports
// ============================================================================

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Delimiter between segments of a parameter path.
const PATH_DELIMITER: char = '.';
/// Suffix marking a path segment as an array wildcard.
const WILDCARD_SUFFIX: &str = "[*]";

// ============================================================================
// SECTION: Parse Errors
// ============================================================================

/// Errors returned when parsing a wire-format parameter rule.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum RuleParseError {
    /// Rule text failed to parse as JSON.
    #[error("rule is not valid json: {0}")]
    InvalidJson(String),
    /// Rule entry is not a single-key object.
    #[error("rule entry must be an object with exactly one key")]
    MalformedEntry,
    /// Operator code is not recognized.
    #[error("unknown rule operator: {0}")]
    UnknownOperator(String),
    /// Condition value is missing or has the wrong type for the operator.
    #[error("invalid condition for operator {operator}: {reason}")]
    InvalidCondition {
        /// Operator code from the wire payload.
        operator: String,
        /// Short description of the mismatch.
        reason: String,
    },
    /// Multi-entry rule has no children.
    #[error("multi-entry rule has no children")]
    EmptyChildren,
}

// ============================================================================
// SECTION: Operators
// ============================================================================

/// Comparison operator of a single-entry rule.
///
/// # Invariants
/// - Variants are stable for serialization.
/// - String operators honor [`SingleEntryRule::ignore_case`]; `Regex` does
///   not (the pattern itself controls case folding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    /// String equality.
    Equal,
    /// String inequality.
    NotEqual,
    /// Substring containment.
    Contains,
    /// Negated substring containment.
    NotContains,
    /// String prefix match.
    StartsWith,
    /// Numeric strictly-less-than.
    LessThan,
    /// Numeric less-than-or-equal.
    LessThanOrEqual,
    /// Numeric strictly-greater-than.
    GreaterThan,
    /// Numeric greater-than-or-equal.
    GreaterThanOrEqual,
    /// Membership in a value set.
    AnyOf,
    /// Non-membership in a value set.
    NoneOf,
    /// Regular-expression match.
    Regex,
    /// Matches any present value at the path.
    IsAnyValue,
}

/// Combinator operator of a multi-entry rule.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiEntryOperator {
    /// Matches iff every child matches.
    And,
    /// Matches iff any child matches.
    Or,
    /// Matches iff no child matches.
    Not,
}

// ============================================================================
// SECTION: Rule Types
// ============================================================================

/// Comparison value carried by a single-entry rule.
///
/// # Invariants
/// - The variant must suit the operator: `Text` for string operators,
///   `Number` for ordering operators, `List` for set operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComparisonValue {
    /// String condition for linguistic operators.
    Text(String),
    /// Numeric condition for ordering operators.
    Number(f64),
    /// Value-set condition for membership operators.
    List(Vec<String>),
}

/// Single-entry rule comparing one parameter path against a condition.
///
/// # Invariants
/// - `param_key` is a dot-separated path; segments suffixed `[*]` address
///   array elements existentially.
/// - `comparison` is `None` only for [`RuleOperator::IsAnyValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleEntryRule {
    /// Dot-separated path into the event parameter map.
    pub param_key: String,
    /// Comparison operator.
    pub operator: RuleOperator,
    /// Whether string comparisons fold case before comparing.
    pub ignore_case: bool,
    /// Comparison value; absent for presence checks.
    pub comparison: Option<ComparisonValue>,
}

/// Multi-entry rule combining child rules.
///
/// # Invariants
/// - `children` is non-empty; evaluation order is declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiEntryRule {
    /// Combinator applied to the children.
    pub operator: MultiEntryOperator,
    /// Child rules evaluated in declaration order.
    pub children: Vec<ParameterRule>,
}

/// Parameter rule: a single comparison or a combinator over children.
///
/// # Invariants
/// - Serialized form is tagged `single`/`multi` for stable persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterRule {
    /// Leaf comparison rule.
    Single(SingleEntryRule),
    /// Combinator rule.
    Multi(MultiEntryRule),
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

impl ParameterRule {
    /// Evaluates the rule against a nested event parameter map.
    #[must_use]
    pub fn matches(&self, parameters: &Map<String, Value>) -> bool {
        self.eval(parameters, &mut None)
    }

    /// Evaluates the rule, recording the `param_key` of every single-entry
    /// rule that was actually evaluated.
    ///
    /// The trace makes short-circuit behavior observable to diagnostics and
    /// tests without side effects inside evaluation itself.
    #[must_use]
    pub fn matches_with_trace(
        &self,
        parameters: &Map<String, Value>,
        trace: &mut Vec<String>,
    ) -> bool {
        self.eval(parameters, &mut Some(trace))
    }

    /// Recursive evaluation with an optional trace sink.
    fn eval(&self, parameters: &Map<String, Value>, trace: &mut Option<&mut Vec<String>>) -> bool {
        match self {
            Self::Single(rule) => {
                if let Some(sink) = trace.as_deref_mut() {
                    sink.push(rule.param_key.clone());
                }
                rule.matches(parameters)
            }
            Self::Multi(rule) => match rule.operator {
                MultiEntryOperator::And => {
                    for child in &rule.children {
                        if !child.eval(parameters, trace) {
                            return false;
                        }
                    }
                    true
                }
                MultiEntryOperator::Or => {
                    for child in &rule.children {
                        if child.eval(parameters, trace) {
                            return true;
                        }
                    }
                    false
                }
                MultiEntryOperator::Not => {
                    for child in &rule.children {
                        if child.eval(parameters, trace) {
                            return false;
                        }
                    }
                    true
                }
            },
        }
    }
}

impl SingleEntryRule {
    /// Evaluates the rule against a nested event parameter map.
    #[must_use]
    pub fn matches(&self, parameters: &Map<String, Value>) -> bool {
        if parameters.is_empty() {
            return false;
        }
        let path: Vec<&str> = self.param_key.split(PATH_DELIMITER).collect();
        self.matches_path(parameters, &path)
    }

    /// Resolves a path step and recurses or applies the leaf comparison.
    fn matches_path(&self, parameters: &Map<String, Value>, path: &[&str]) -> bool {
        let Some(segment) = path.first() else {
            return false;
        };

        if let Some(key) = segment.strip_suffix(WILDCARD_SUFFIX) {
            return self.matches_wildcard(parameters, key, path);
        }

        let Some(value) = parameters.get(*segment) else {
            return false;
        };

        if path.len() == 1 {
            return self.matches_leaf(value);
        }

        match value {
            Value::Object(nested) => self.matches_path(nested, &path[1 ..]),
            _ => false,
        }
    }

    /// Applies existential quantification over the array at `key`.
    ///
    /// A wildcard segment cannot be the leaf: the remaining path is matched
    /// against each element, and the rule matches when any element does.
    fn matches_wildcard(&self, parameters: &Map<String, Value>, key: &str, path: &[&str]) -> bool {
        let Some(Value::Array(items)) = parameters.get(key) else {
            return false;
        };
        if items.is_empty() || path.len() < 2 {
            return false;
        }
        items.iter().any(|item| match item {
            Value::Object(nested) => self.matches_path(nested, &path[1 ..]),
            _ => false,
        })
    }

    /// Applies the operator to the resolved leaf value.
    fn matches_leaf(&self, value: &Value) -> bool {
        match self.operator {
            RuleOperator::IsAnyValue => !value.is_null(),
            RuleOperator::Equal
            | RuleOperator::NotEqual
            | RuleOperator::Contains
            | RuleOperator::NotContains
            | RuleOperator::StartsWith => self.matches_text(value),
            RuleOperator::Regex => self.matches_regex(value),
            RuleOperator::AnyOf | RuleOperator::NoneOf => self.matches_set(value),
            RuleOperator::LessThan
            | RuleOperator::LessThanOrEqual
            | RuleOperator::GreaterThan
            | RuleOperator::GreaterThanOrEqual => self.matches_numeric(value),
        }
    }

    /// Evaluates linguistic operators against a string leaf.
    fn matches_text(&self, value: &Value) -> bool {
        let (Value::String(observed), Some(ComparisonValue::Text(condition))) =
            (value, &self.comparison)
        else {
            return false;
        };
        let observed = self.fold_case(observed);
        let condition = self.fold_case(condition);
        match self.operator {
            RuleOperator::Equal => observed == condition,
            RuleOperator::NotEqual => observed != condition,
            RuleOperator::Contains => observed.contains(&condition),
            RuleOperator::NotContains => !observed.contains(&condition),
            RuleOperator::StartsWith => observed.starts_with(&condition),
            _ => false,
        }
    }

    /// Evaluates the regex operator against a string leaf.
    ///
    /// Case folding is controlled by the pattern itself (`(?i)`), never by
    /// `ignore_case`. Invalid or empty patterns evaluate to `false`.
    fn matches_regex(&self, value: &Value) -> bool {
        let (Value::String(observed), Some(ComparisonValue::Text(pattern))) =
            (value, &self.comparison)
        else {
            return false;
        };
        if pattern.is_empty() {
            return false;
        }
        Regex::new(pattern).is_ok_and(|regex| regex.is_match(observed))
    }

    /// Evaluates set-membership operators against a string leaf.
    fn matches_set(&self, value: &Value) -> bool {
        let (Value::String(observed), Some(ComparisonValue::List(condition))) =
            (value, &self.comparison)
        else {
            return false;
        };
        let observed = self.fold_case(observed);
        let contained = condition.iter().any(|item| self.fold_case(item) == observed);
        match self.operator {
            RuleOperator::AnyOf => contained,
            RuleOperator::NoneOf => !contained,
            _ => false,
        }
    }

    /// Evaluates ordering operators with numeric coercion on both sides.
    ///
    /// Non-numeric input on either side yields `false`, never an error.
    fn matches_numeric(&self, value: &Value) -> bool {
        let Some(observed) = coerce_number(value) else {
            return false;
        };
        let condition = match &self.comparison {
            Some(ComparisonValue::Number(number)) => *number,
            Some(ComparisonValue::Text(text)) => match text.trim().parse() {
                Ok(number) => number,
                Err(_) => return false,
            },
            _ => return false,
        };
        match self.operator {
            RuleOperator::LessThan => observed < condition,
            RuleOperator::LessThanOrEqual => observed <= condition,
            RuleOperator::GreaterThan => observed > condition,
            RuleOperator::GreaterThanOrEqual => observed >= condition,
            _ => false,
        }
    }

    /// Folds case when `ignore_case` is set.
    fn fold_case(&self, text: &str) -> String {
        if self.ignore_case {
            text.to_lowercase()
        } else {
            text.to_string()
        }
    }
}

/// Coerces a JSON leaf to a number; numeric strings are parsed.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// SECTION: Wire Parsing
// ============================================================================

/// Parses a wire-format rule from its JSON text form.
///
/// # Errors
///
/// Returns [`RuleParseError`] when the text is not valid JSON or the payload
/// violates the wire format.
pub fn parse_rule_text(text: &str) -> Result<ParameterRule, RuleParseError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| RuleParseError::InvalidJson(err.to_string()))?;
    parse_rule_value(&value)
}

/// Parses a wire-format rule from a JSON value.
///
/// The wire format is operator-keyed: a multi-entry rule is
/// `{"and": [..]}` / `{"or": [..]}` / `{"not": [..]}`, and a single-entry
/// rule is `{"<param_key>": {"<operator_code>": <condition>}}`.
///
/// # Errors
///
/// Returns [`RuleParseError`] when the payload violates the wire format.
pub fn parse_rule_value(value: &Value) -> Result<ParameterRule, RuleParseError> {
    let Value::Object(entry) = value else {
        return Err(RuleParseError::MalformedEntry);
    };
    if entry.len() != 1 {
        return Err(RuleParseError::MalformedEntry);
    }
    let Some((key, body)) = entry.iter().next() else {
        return Err(RuleParseError::MalformedEntry);
    };

    match key.to_lowercase().as_str() {
        "and" => parse_multi_rule(MultiEntryOperator::And, body),
        "or" => parse_multi_rule(MultiEntryOperator::Or, body),
        "not" => parse_multi_rule(MultiEntryOperator::Not, body),
        _ => parse_single_rule(key, body),
    }
}

/// Parses the children of a multi-entry wire rule.
fn parse_multi_rule(
    operator: MultiEntryOperator,
    body: &Value,
) -> Result<ParameterRule, RuleParseError> {
    let Value::Array(entries) = body else {
        return Err(RuleParseError::EmptyChildren);
    };
    let mut children = Vec::with_capacity(entries.len());
    for entry in entries {
        children.push(parse_rule_value(entry)?);
    }
    if children.is_empty() {
        return Err(RuleParseError::EmptyChildren);
    }
    Ok(ParameterRule::Multi(MultiEntryRule {
        operator,
        children,
    }))
}

/// Parses a single-entry wire rule body keyed by its parameter path.
fn parse_single_rule(param_key: &str, body: &Value) -> Result<ParameterRule, RuleParseError> {
    let Value::Object(entry) = body else {
        return Err(RuleParseError::MalformedEntry);
    };
    if entry.len() != 1 {
        return Err(RuleParseError::MalformedEntry);
    }
    let Some((code, condition)) = entry.iter().next() else {
        return Err(RuleParseError::MalformedEntry);
    };

    let code = code.to_lowercase();
    let (operator, ignore_case) = decode_operator(&code)?;
    let comparison = decode_condition(&code, operator, condition)?;

    Ok(ParameterRule::Single(SingleEntryRule {
        param_key: param_key.to_string(),
        operator,
        ignore_case,
        comparison,
    }))
}

/// Maps a wire operator code to an operator and its case-folding flag.
///
/// The legacy wire format treats the plain linguistic codes (`eq`,
/// `contains`, `starts_with`, ...) as case-insensitive; only the set
/// operators distinguish `is_any` from `i_is_any`.
fn decode_operator(code: &str) -> Result<(RuleOperator, bool), RuleParseError> {
    let decoded = match code {
        "eq" | "i_eq" => (RuleOperator::Equal, true),
        "neq" | "i_neq" => (RuleOperator::NotEqual, true),
        "contains" | "i_contains" => (RuleOperator::Contains, true),
        "not_contains" | "i_not_contains" => (RuleOperator::NotContains, true),
        "starts_with" | "i_starts_with" => (RuleOperator::StartsWith, true),
        "regex_match" => (RuleOperator::Regex, false),
        "lt" => (RuleOperator::LessThan, false),
        "lte" => (RuleOperator::LessThanOrEqual, false),
        "gt" => (RuleOperator::GreaterThan, false),
        "gte" => (RuleOperator::GreaterThanOrEqual, false),
        "is_any" => (RuleOperator::AnyOf, false),
        "is_not_any" => (RuleOperator::NoneOf, false),
        "i_is_any" => (RuleOperator::AnyOf, true),
        "i_is_not_any" => (RuleOperator::NoneOf, true),
        "is_any_value" => (RuleOperator::IsAnyValue, false),
        _ => return Err(RuleParseError::UnknownOperator(code.to_string())),
    };
    Ok(decoded)
}

/// Extracts and type-checks the condition value for an operator.
fn decode_condition(
    code: &str,
    operator: RuleOperator,
    condition: &Value,
) -> Result<Option<ComparisonValue>, RuleParseError> {
    let invalid = |reason: &str| RuleParseError::InvalidCondition {
        operator: code.to_string(),
        reason: reason.to_string(),
    };

    match operator {
        RuleOperator::IsAnyValue => Ok(None),
        RuleOperator::Equal
        | RuleOperator::NotEqual
        | RuleOperator::Contains
        | RuleOperator::NotContains
        | RuleOperator::StartsWith
        | RuleOperator::Regex => match condition {
            Value::String(text) => Ok(Some(ComparisonValue::Text(text.clone()))),
            _ => Err(invalid("expected a string condition")),
        },
        RuleOperator::LessThan
        | RuleOperator::LessThanOrEqual
        | RuleOperator::GreaterThan
        | RuleOperator::GreaterThanOrEqual => match condition.as_f64() {
            Some(number) => Ok(Some(ComparisonValue::Number(number))),
            None => Err(invalid("expected a numeric condition")),
        },
        RuleOperator::AnyOf | RuleOperator::NoneOf => {
            let Value::Array(items) = condition else {
                return Err(invalid("expected an array condition"));
            };
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(text) => list.push(text.clone()),
                    _ => return Err(invalid("expected an array of strings")),
                }
            }
            if list.is_empty() {
                return Err(invalid("expected a non-empty array"));
            }
            Ok(Some(ComparisonValue::List(list)))
        }
    }
}
