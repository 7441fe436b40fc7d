// crates/aem-reporter/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Shared fakes and fixtures for aem-reporter tests.
// Purpose: Provide deterministic collaborators for engine integration tests.
// Dependencies: aem-core, serde_json
// ============================================================================

//! ## Overview
//! Deterministic collaborator fakes (networker, platform channel, clock),
//! polling helpers, and wire-format configuration fixtures shared by the
//! engine integration tests.

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

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use aem_core::AemNetworker;
use aem_core::Clock;
use aem_core::NetworkError;
use aem_core::PlatformChannel;
use aem_core::Timestamp;
use serde_json::Value;
use serde_json::json;

/// Reference time used by the engine tests.
pub const NOW: i64 = 1_700_000_000;

// ----------------------------------------------------------------------------
// Networker fake
// ----------------------------------------------------------------------------

/// One request observed by the fake networker.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// HTTP-ish method, `GET` or `POST`.
    pub method: &'static str,
    /// Request path.
    pub path: String,
    /// Request parameters.
    pub params: BTreeMap<String, String>,
}

/// Shared state behind [`FakeNetworker`] clones.
struct NetworkerInner {
    calls: Mutex<Vec<RecordedCall>>,
    config_responses: Mutex<VecDeque<Result<Value, NetworkError>>>,
    post_responses: Mutex<VecDeque<Result<Value, NetworkError>>>,
    filter_responses: Mutex<VecDeque<Result<Value, NetworkError>>>,
    config_gate: Mutex<bool>,
    config_gate_signal: Condvar,
}

/// Scripted, recording [`AemNetworker`] fake.
///
/// Responses are staged per endpoint family; unstaged requests answer with a
/// benign empty payload. Configuration fetches can be gated to hold them
/// in flight while the test observes coalescing.
#[derive(Clone)]
pub struct FakeNetworker {
    inner: Arc<NetworkerInner>,
}

impl Default for FakeNetworker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeNetworker {
    /// Creates an empty fake with no staged responses.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkerInner {
                calls: Mutex::new(Vec::new()),
                config_responses: Mutex::new(VecDeque::new()),
                post_responses: Mutex::new(VecDeque::new()),
                filter_responses: Mutex::new(VecDeque::new()),
                config_gate: Mutex::new(false),
                config_gate_signal: Condvar::new(),
            }),
        }
    }

    /// Stages the next configuration fetch response.
    pub fn stage_config_response(&self, response: Result<Value, NetworkError>) {
        self.inner.config_responses.lock().expect("lock").push_back(response);
    }

    /// Stages the next report POST response.
    pub fn stage_post_response(&self, response: Result<Value, NetworkError>) {
        self.inner.post_responses.lock().expect("lock").push_back(response);
    }

    /// Stages the next catalog filter response.
    pub fn stage_filter_response(&self, response: Result<Value, NetworkError>) {
        self.inner.filter_responses.lock().expect("lock").push_back(response);
    }

    /// Holds configuration fetches in flight until released.
    pub fn hold_config_requests(&self) {
        *self.inner.config_gate.lock().expect("lock") = true;
    }

    /// Releases held configuration fetches.
    pub fn release_config_requests(&self) {
        *self.inner.config_gate.lock().expect("lock") = false;
        self.inner.config_gate_signal.notify_all();
    }

    /// Returns every observed request.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.calls.lock().expect("lock").clone()
    }

    /// Counts observed requests by method and path suffix.
    pub fn count(&self, method: &str, path_suffix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.method == method && call.path.ends_with(path_suffix))
            .count()
    }

    /// Records one request.
    fn record(&self, method: &'static str, path: &str, params: &BTreeMap<String, String>) {
        self.inner.calls.lock().expect("lock").push(RecordedCall {
            method,
            path: path.to_string(),
            params: params.clone(),
        });
    }

    /// Blocks while the configuration gate is held.
    fn wait_for_gate(&self) {
        let mut held = self.inner.config_gate.lock().expect("lock");
        while *held {
            held = self.inner.config_gate_signal.wait(held).expect("gate wait");
        }
    }
}

impl AemNetworker for FakeNetworker {
    fn get(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Value, NetworkError> {
        self.record("GET", path, params);
        if path.ends_with("aem_conversion_configs") {
            self.wait_for_gate();
            return self
                .inner
                .config_responses
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Ok(json!({"data": []})));
        }
        self.inner
            .filter_responses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"data": []})))
    }

    fn post(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Value, NetworkError> {
        self.record("POST", path, params);
        self.inner
            .post_responses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"success": true})))
    }
}

// ----------------------------------------------------------------------------
// Platform channel fake
// ----------------------------------------------------------------------------

/// Shared state behind [`FakePlatform`] clones.
#[derive(Default)]
struct PlatformInner {
    cutoff: AtomicBool,
    reporting: Mutex<BTreeSet<String>>,
}

/// Configurable [`PlatformChannel`] fake.
#[derive(Clone, Default)]
pub struct FakePlatform {
    inner: Arc<PlatformInner>,
}

impl FakePlatform {
    /// Creates a channel that reports nothing and has not cut off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an event as reported by the platform channel.
    pub fn report_event(&self, event: &str) {
        self.inner.reporting.lock().expect("lock").insert(event.to_string());
    }

    /// Sets whether the platform channel has stopped tracking.
    pub fn set_cutoff(&self, cutoff: bool) {
        self.inner.cutoff.store(cutoff, Ordering::SeqCst);
    }
}

impl PlatformChannel for FakePlatform {
    fn should_cutoff(&self) -> bool {
        self.inner.cutoff.load(Ordering::SeqCst)
    }

    fn is_reporting_event(&self, event: &str) -> bool {
        self.inner.reporting.lock().expect("lock").contains(event)
    }
}

// ----------------------------------------------------------------------------
// Clock fake
// ----------------------------------------------------------------------------

/// Settable [`Clock`] shared between test and engine.
#[derive(Clone)]
pub struct FixedClock {
    seconds: Arc<AtomicI64>,
}

impl FixedClock {
    /// Creates a clock pinned at `seconds` since the epoch.
    pub fn at(seconds: i64) -> Self {
        Self {
            seconds: Arc::new(AtomicI64::new(seconds)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, seconds: i64) {
        self.seconds.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_seconds(self.seconds.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Polling
// ----------------------------------------------------------------------------

/// Polls `predicate` until it holds or five seconds elapse.
pub fn wait_for(mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

// ----------------------------------------------------------------------------
// Configuration fixtures
// ----------------------------------------------------------------------------

/// Configuration fetch payload wrapping the given entries.
pub fn config_payload(entries: Vec<Value>) -> Value {
    json!({"data": entries})
}

/// Wire-format DEFAULT-mode configuration with purchase and subscribe rules.
pub fn default_config_entry(valid_from: i64) -> Value {
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
                "conversion_value": 2,
                "priority": 5,
                "events": [{"event_name": "fb_mobile_purchase"}]
            }
        ]
    })
}

/// DEFAULT-mode configuration gated by an `is_any` parameter rule.
pub fn gated_config_entry(valid_from: i64) -> Value {
    let param_rule = json!({"value": {"is_any": ["a", "b"]}}).to_string();
    json!({
        "default_currency": "USD",
        "cutoff_time": 1,
        "valid_from": valid_from,
        "config_mode": "DEFAULT",
        "param_rule": param_rule,
        "conversion_value_rules": [
            {
                "conversion_value": 2,
                "priority": 5,
                "events": [{"event_name": "fb_mobile_purchase"}]
            }
        ]
    })
}
